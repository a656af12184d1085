//! In-memory protocol for tests
//!
//! [`RecordingProtocol`] opens sessions that never touch the network and
//! record every call, so pipelines and the engine can be exercised end to
//! end.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ConnectOptions, Credentials, ProtocolError, ProtocolModule, Session};

/// One recorded session call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Open { host: String, options: ConnectOptions },
    Authenticate { host: String, credentials: Credentials, wait: bool },
    Send { host: String, data: String },
    Execute { host: String, command: String },
    Close { host: String },
}

impl SessionEvent {
    pub fn host(&self) -> &str {
        match self {
            Self::Open { host, .. }
            | Self::Authenticate { host, .. }
            | Self::Send { host, .. }
            | Self::Execute { host, .. }
            | Self::Close { host } => host,
        }
    }
}

#[derive(Default)]
struct Behaviour {
    fail_open: HashSet<String>,
    fail_execute: HashSet<String>,
    execute_delay: Option<Duration>,
}

/// Protocol module that records calls instead of connecting
#[derive(Clone, Default)]
pub struct RecordingProtocol {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl RecordingProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for `host`
    pub fn fail_open_on(self, host: &str) -> Self {
        if let Ok(mut behaviour) = self.behaviour.lock() {
            behaviour.fail_open.insert(host.to_string());
        }
        self
    }

    /// Make every `execute` fail for `host`
    pub fn fail_execute_on(self, host: &str) -> Self {
        if let Ok(mut behaviour) = self.behaviour.lock() {
            behaviour.fail_execute.insert(host.to_string());
        }
        self
    }

    /// Sleep this long in every `execute`
    pub fn with_execute_delay(self, delay: Duration) -> Self {
        if let Ok(mut behaviour) = self.behaviour.lock() {
            behaviour.execute_delay = Some(delay);
        }
        self
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Hosts in the order they were opened
    pub fn opened_hosts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Open { host, .. } => Some(host),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self, host: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, SessionEvent::Close { host: h } if h == host))
            .count()
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Execute { host: h, command } if h == host => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Send { host: h, data } if h == host => Some(data),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl ProtocolModule for RecordingProtocol {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn open(&self, host: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, ProtocolError> {
        self.record(SessionEvent::Open {
            host: host.to_string(),
            options: options.clone(),
        });

        let (fail_open, fail_execute, execute_delay) = match self.behaviour.lock() {
            Ok(b) => (b.fail_open.contains(host), b.fail_execute.contains(host), b.execute_delay),
            Err(_) => (false, false, None),
        };
        if fail_open {
            return Err(ProtocolError::ConnectionClosed { host: host.to_string() });
        }

        Ok(Box::new(RecordingSession {
            host: host.to_string(),
            protocol: self.clone(),
            fail_execute,
            execute_delay,
        }))
    }
}

struct RecordingSession {
    host: String,
    protocol: RecordingProtocol,
    fail_execute: bool,
    execute_delay: Option<Duration>,
}

#[async_trait]
impl Session for RecordingSession {
    async fn authenticate(&mut self, credentials: &Credentials, wait: bool) -> Result<(), ProtocolError> {
        self.protocol.record(SessionEvent::Authenticate {
            host: self.host.clone(),
            credentials: credentials.clone(),
            wait,
        });
        Ok(())
    }

    async fn send(&mut self, data: &str) -> Result<(), ProtocolError> {
        self.protocol.record(SessionEvent::Send {
            host: self.host.clone(),
            data: data.to_string(),
        });
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> Result<String, ProtocolError> {
        self.protocol.record(SessionEvent::Execute {
            host: self.host.clone(),
            command: command.to_string(),
        });
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_execute {
            return Err(ProtocolError::CommandFailed {
                host: self.host.clone(),
                command: command.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(format!("{}\n{}# ", command, self.host))
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.protocol.record(SessionEvent::Close { host: self.host.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_session_calls() {
        let protocol = RecordingProtocol::new();
        let mut session = protocol.open("h1", &ConnectOptions::default()).await.unwrap();
        session.execute("show version").await.unwrap();
        session.close().await.unwrap();

        assert_eq!(protocol.opened_hosts(), vec!["h1"]);
        assert_eq!(protocol.commands("h1"), vec!["show version"]);
        assert_eq!(protocol.close_count("h1"), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let protocol = RecordingProtocol::new().fail_open_on("bad").fail_execute_on("flaky");

        assert!(protocol.open("bad", &ConnectOptions::default()).await.is_err());

        let mut session = protocol.open("flaky", &ConnectOptions::default()).await.unwrap();
        assert!(session.execute("x").await.is_err());
    }
}
