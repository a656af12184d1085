//! Protocol modules
//!
//! A protocol module opens [`Session`]s to hosts. Modules are looked up by
//! protocol tag in a [`ProtocolRegistry`]; adding a protocol means
//! registering another module under its tag.

mod error;
mod process;
mod ssh;
mod telnet;
pub mod testing;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ProtocolConfig;
use crate::domain::Protocol;

pub use error::ProtocolError;
pub use process::{ProcessSession, PromptPatterns};
pub use ssh::{ASKPASS_ENV, SshModule, ssh_args};
pub use telnet::TelnetModule;

/// Per-connection options derived while building a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub port: Option<u16>,
    /// Mirror received output to stdout
    pub echo: bool,
    /// Accept unknown host keys (Some(true)) or require known ones (Some(false))
    pub auto_verify: Option<bool>,
    /// SSH protocol version; None lets the client negotiate
    pub ssh_version: Option<u8>,
}

/// Credentials presented by the Authenticate stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password {
        username: Option<String>,
        password: Option<String>,
    },
    KeyFile {
        username: Option<String>,
        key_file: PathBuf,
    },
}

impl Credentials {
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Password { username, .. } | Self::KeyFile { username, .. } => username.as_deref(),
        }
    }
}

/// Opens sessions for one wire protocol
#[async_trait]
pub trait ProtocolModule: Send + Sync {
    /// Module name for diagnostics
    fn name(&self) -> &'static str;

    /// Open a session to `host`
    async fn open(&self, host: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, ProtocolError>;
}

/// An open connection to one host, owned by exactly one job
#[async_trait]
pub trait Session: Send {
    /// Log in; when `wait` is set, return only once the command prompt shows
    async fn authenticate(&mut self, credentials: &Credentials, wait: bool) -> Result<(), ProtocolError>;

    /// Send a line without waiting for a prompt
    async fn send(&mut self, data: &str) -> Result<(), ProtocolError>;

    /// Send a command and return the output up to the next prompt
    async fn execute(&mut self, command: &str) -> Result<String, ProtocolError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// A registered module plus the SSH version its tag implies
#[derive(Clone)]
pub struct ProtocolEntry {
    pub module: Arc<dyn ProtocolModule>,
    pub ssh_version: Option<u8>,
}

/// Maps protocol tags to modules
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    entries: HashMap<String, ProtocolEntry>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Telnet and SSH modules driving the system client programs
    pub fn standard(config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        debug!(?config, "ProtocolRegistry::standard: called");
        let patterns = Arc::new(PromptPatterns::from_config(config)?);
        let telnet: Arc<dyn ProtocolModule> = Arc::new(TelnetModule::new(config, patterns.clone()));
        let ssh: Arc<dyn ProtocolModule> = Arc::new(SshModule::new(config, patterns));

        let mut registry = Self::new();
        registry.register(Protocol::Telnet.tag(), telnet, None);
        registry.register(Protocol::Ssh.tag(), ssh.clone(), None);
        registry.register(Protocol::Ssh1.tag(), ssh.clone(), Some(1));
        registry.register(Protocol::Ssh2.tag(), ssh, Some(2));
        Ok(registry)
    }

    /// Register `module` for `telnet`, `ssh`, `ssh1` and `ssh2` alike
    pub fn uniform(module: Arc<dyn ProtocolModule>) -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::Telnet.tag(), module.clone(), None);
        registry.register(Protocol::Ssh.tag(), module.clone(), None);
        registry.register(Protocol::Ssh1.tag(), module.clone(), Some(1));
        registry.register(Protocol::Ssh2.tag(), module, Some(2));
        registry
    }

    pub fn register(&mut self, tag: &str, module: Arc<dyn ProtocolModule>, ssh_version: Option<u8>) {
        debug!(%tag, module = module.name(), ?ssh_version, "ProtocolRegistry::register: called");
        self.entries
            .insert(tag.to_string(), ProtocolEntry { module, ssh_version });
    }

    pub fn lookup(&self, protocol: &Protocol) -> Option<&ProtocolEntry> {
        self.entries.get(protocol.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::RecordingProtocol;

    #[test]
    fn test_standard_registry_tags() {
        let registry = ProtocolRegistry::standard(&ProtocolConfig::default()).unwrap();

        assert_eq!(registry.lookup(&Protocol::Telnet).unwrap().module.name(), "telnet");
        assert_eq!(registry.lookup(&Protocol::Ssh).unwrap().ssh_version, None);
        assert_eq!(registry.lookup(&Protocol::Ssh1).unwrap().ssh_version, Some(1));
        assert_eq!(registry.lookup(&Protocol::Ssh2).unwrap().ssh_version, Some(2));
        assert!(registry.lookup(&Protocol::Unsupported("ftp".into())).is_none());
    }

    #[test]
    fn test_standard_registry_rejects_bad_pattern() {
        let config = ProtocolConfig {
            prompt: "([".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ProtocolRegistry::standard(&config),
            Err(ProtocolError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_uniform_registry() {
        let registry = ProtocolRegistry::uniform(Arc::new(RecordingProtocol::new()));
        assert_eq!(registry.lookup(&Protocol::Ssh2).unwrap().module.name(), "recording");
        assert_eq!(registry.lookup(&Protocol::Ssh2).unwrap().ssh_version, Some(2));
    }

    #[test]
    fn test_credentials_username() {
        let creds = Credentials::KeyFile {
            username: Some("alice".into()),
            key_file: PathBuf::from("/tmp/id"),
        };
        assert_eq!(creds.username(), Some("alice"));
    }
}
