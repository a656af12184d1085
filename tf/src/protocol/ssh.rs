//! SSH via the OpenSSH client
//!
//! The ssh process is started by the Authenticate stage because the login
//! name and key file are part of its command line. A session used without
//! authentication starts ssh on first use.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ConnectOptions, Credentials, ProcessSession, PromptPatterns, ProtocolError, ProtocolModule, Session};
use crate::config::ProtocolConfig;

/// Environment variable carrying the password to the askpass helper
///
/// When set, `tf` prints its value and exits instead of running normally;
/// ssh invokes `tf` as its `SSH_ASKPASS` program.
pub const ASKPASS_ENV: &str = "TERMFLEET_ASKPASS";

/// Build the ssh argument list for one connection
pub fn ssh_args(host: &str, options: &ConnectOptions, credentials: Option<&Credentials>) -> Vec<String> {
    let mut args = vec!["-tt".to_string()];
    match options.ssh_version {
        Some(1) => args.push("-1".to_string()),
        Some(2) => args.push("-2".to_string()),
        _ => {}
    }
    if let Some(port) = options.port {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    match options.auto_verify {
        Some(true) => args.extend(["-o".to_string(), "StrictHostKeyChecking=no".to_string()]),
        Some(false) => args.extend(["-o".to_string(), "StrictHostKeyChecking=yes".to_string()]),
        None => {}
    }
    if let Some(credentials) = credentials {
        if let Some(username) = credentials.username() {
            args.push("-l".to_string());
            args.push(username.to_string());
        }
        match credentials {
            Credentials::KeyFile { key_file, .. } => {
                args.push("-i".to_string());
                args.push(key_file.display().to_string());
                args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
            Credentials::Password { password: Some(_), .. } => {
                args.extend([
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                    "-o".to_string(),
                    "NumberOfPasswordPrompts=1".to_string(),
                ]);
            }
            Credentials::Password { .. } => {}
        }
    }
    args.push(host.to_string());
    args
}

/// Opens SSH sessions through the configured ssh program
pub struct SshModule {
    program: String,
    patterns: Arc<PromptPatterns>,
    timeout: Duration,
    askpass: Option<PathBuf>,
}

impl SshModule {
    pub fn new(config: &ProtocolConfig, patterns: Arc<PromptPatterns>) -> Self {
        let askpass = match std::env::current_exe() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "SshModule::new: cannot locate askpass helper");
                None
            }
        };
        Self {
            program: config.ssh_program.clone(),
            patterns,
            timeout: Duration::from_millis(config.timeout_ms),
            askpass,
        }
    }
}

#[async_trait]
impl ProtocolModule for SshModule {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn open(&self, host: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, ProtocolError> {
        debug!(%host, ?options, "SshModule::open: called");
        Ok(Box::new(SshSession {
            program: self.program.clone(),
            host: host.to_string(),
            options: options.clone(),
            patterns: self.patterns.clone(),
            timeout: self.timeout,
            askpass: self.askpass.clone(),
            process: None,
        }))
    }
}

struct SshSession {
    program: String,
    host: String,
    options: ConnectOptions,
    patterns: Arc<PromptPatterns>,
    timeout: Duration,
    askpass: Option<PathBuf>,
    process: Option<ProcessSession>,
}

impl SshSession {
    fn launch(&mut self, credentials: Option<&Credentials>) -> Result<&mut ProcessSession, ProtocolError> {
        debug!(host = %self.host, "SshSession::launch: called");
        let mut command = Command::new(&self.program);
        command.args(ssh_args(&self.host, &self.options, credentials));

        if let Some(Credentials::Password {
            password: Some(password),
            ..
        }) = credentials
        {
            let askpass = self.askpass.as_ref().ok_or_else(|| ProtocolError::MissingCredentials {
                host: self.host.clone(),
                what: "askpass helper".to_string(),
            })?;
            command
                .env("SSH_ASKPASS", askpass)
                .env("SSH_ASKPASS_REQUIRE", "force")
                .env(ASKPASS_ENV, password);
        }

        let process = ProcessSession::spawn(command, &self.host, self.patterns.clone(), self.timeout, self.options.echo)?;
        Ok(self.process.insert(process))
    }

    fn running(&mut self) -> Result<&mut ProcessSession, ProtocolError> {
        if self.process.is_some() {
            return self.process.as_mut().ok_or(ProtocolError::NotConnected);
        }
        self.launch(None)
    }
}

#[async_trait]
impl Session for SshSession {
    async fn authenticate(&mut self, credentials: &Credentials, wait: bool) -> Result<(), ProtocolError> {
        if self.process.is_some() {
            return Err(ProtocolError::AuthenticationFailed {
                host: self.host.clone(),
                reason: "session already started".to_string(),
            });
        }
        let process = self.launch(Some(credentials))?;
        if wait {
            process.wait_for_prompt().await?;
        }
        Ok(())
    }

    async fn send(&mut self, data: &str) -> Result<(), ProtocolError> {
        self.running()?.write_line(data).await
    }

    async fn execute(&mut self, command: &str) -> Result<String, ProtocolError> {
        self.running()?.execute(command).await
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        match self.process.as_mut() {
            Some(process) => process.shutdown().await,
            None => Ok(()),
        }
    }
}
