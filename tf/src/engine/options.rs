//! Per-run options

use std::path::PathBuf;
use std::time::Duration;

use crate::config::RunConfig;

/// Options for one `Engine::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Scheduler concurrency; also gates default echo
    pub connections: usize,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Protocol for host URLs without a scheme
    pub protocol: String,
    pub no_echo: bool,
    pub ssh_key: Option<PathBuf>,
    pub ssh_auto_verify: Option<bool>,
    pub no_initial_prompt: bool,
    pub no_prompt: bool,
    pub no_authentication: bool,
    pub priority: Option<String>,
    /// Bound on the abort after an interrupt
    pub shutdown_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            connections: config.connections.max(1),
            user: config.user.clone(),
            password: config.password.clone(),
            protocol: config.protocol.clone(),
            no_echo: config.no_echo,
            ssh_key: config.ssh_key.clone(),
            ssh_auto_verify: config.ssh_auto_verify,
            no_initial_prompt: config.no_initial_prompt,
            no_prompt: config.no_prompt,
            no_authentication: config.no_authentication,
            priority: config.priority.clone(),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunOptions::default();
        assert_eq!(options.connections, 1);
        assert_eq!(options.protocol, "telnet");
        assert_eq!(options.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_connections_clamped() {
        let config = RunConfig {
            connections: 0,
            ..Default::default()
        };
        assert_eq!(RunOptions::from(&config).connections, 1);
    }
}
