//! Telnet via the system telnet client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ConnectOptions, ProcessSession, PromptPatterns, ProtocolError, ProtocolModule, Session};
use crate::config::ProtocolConfig;

/// Opens telnet sessions by spawning the configured client program
pub struct TelnetModule {
    program: String,
    patterns: Arc<PromptPatterns>,
    timeout: Duration,
}

impl TelnetModule {
    pub fn new(config: &ProtocolConfig, patterns: Arc<PromptPatterns>) -> Self {
        Self {
            program: config.telnet_program.clone(),
            patterns,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    fn command(&self, host: &str, options: &ConnectOptions) -> Command {
        let mut command = Command::new(&self.program);
        command.arg(host);
        if let Some(port) = options.port {
            command.arg(port.to_string());
        }
        command
    }
}

#[async_trait]
impl ProtocolModule for TelnetModule {
    fn name(&self) -> &'static str {
        "telnet"
    }

    async fn open(&self, host: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, ProtocolError> {
        debug!(%host, ?options, "TelnetModule::open: called");
        let session = ProcessSession::spawn(
            self.command(host, options),
            host,
            self.patterns.clone(),
            self.timeout,
            options.echo,
        )?;
        Ok(Box::new(session))
    }
}
