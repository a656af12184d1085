//! termfleet configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const LOCAL_CONFIG: &str = ".termfleet.yml";

/// Main termfleet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level for the diagnostic log file
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Engine-wide settings
    pub engine: EngineConfig,

    /// Defaults for every run
    pub run: RunConfig,

    /// Client programs and prompt patterns
    pub protocols: ProtocolConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only `log-level`, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// `./.termfleet.yml`, then `<config_dir>/termfleet/termfleet.yml`
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("termfleet").join("termfleet.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Level of engine progress messages printed to stdout
    pub verbose: u8,

    /// Level of script compiler diagnostics
    #[serde(rename = "parser-verbose")]
    pub parser_verbose: u8,

    /// Suffix appended to hostnames without a dot
    pub domain: String,

    /// Directory for per-host transcript and error logs
    pub logdir: Option<PathBuf>,

    /// Truncate existing logs instead of appending
    #[serde(rename = "overwrite-logs")]
    pub overwrite_logs: bool,
}

/// Defaults for every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hosts contacted at once
    pub connections: usize,

    /// Login name when the host URL has none
    pub user: Option<String>,

    /// Password when the host URL has none
    pub password: Option<String>,

    /// Protocol when the host URL has none
    pub protocol: String,

    #[serde(rename = "no-echo")]
    pub no_echo: bool,

    /// Key file for key-based SSH authentication
    #[serde(rename = "ssh-key")]
    pub ssh_key: Option<PathBuf>,

    #[serde(rename = "ssh-auto-verify")]
    pub ssh_auto_verify: Option<bool>,

    #[serde(rename = "no-initial-prompt")]
    pub no_initial_prompt: bool,

    #[serde(rename = "no-prompt")]
    pub no_prompt: bool,

    #[serde(rename = "no-authentication")]
    pub no_authentication: bool,

    /// `force`, `high`, or anything else for normal
    pub priority: Option<String>,

    /// Bound on the shutdown after an interrupt
    #[serde(rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            connections: 1,
            user: None,
            password: None,
            protocol: "telnet".to_string(),
            no_echo: false,
            ssh_key: None,
            ssh_auto_verify: None,
            no_initial_prompt: false,
            no_prompt: false,
            no_authentication: false,
            priority: None,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Client programs and prompt patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    #[serde(rename = "telnet-program")]
    pub telnet_program: String,

    #[serde(rename = "ssh-program")]
    pub ssh_program: String,

    /// Regex matching the command prompt at the end of output
    pub prompt: String,

    #[serde(rename = "login-prompt")]
    pub login_prompt: String,

    #[serde(rename = "password-prompt")]
    pub password_prompt: String,

    /// How long to wait for any expected prompt
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            telnet_program: "telnet".to_string(),
            ssh_program: "ssh".to_string(),
            prompt: r"(?:^|[\r\n])[\-\w+\.:/@~\[\]]+(?:\([^\)]+\))?[>#$%] ?$".to_string(),
            login_prompt: r"(?i)(?:user ?name|login) ?: ?$".to_string(),
            password_prompt: r"(?i)password ?: ?$".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.run.connections, 1);
        assert_eq!(config.run.protocol, "telnet");
        assert_eq!(config.run.shutdown_timeout_secs, 30);
        assert_eq!(config.protocols.timeout_ms, 30_000);
        assert!(config.engine.logdir.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

engine:
  verbose: 1
  domain: example.com
  logdir: /var/log/termfleet
  overwrite-logs: true

run:
  connections: 8
  user: admin
  protocol: ssh
  ssh-auto-verify: true
  no-prompt: true
  priority: high

protocols:
  ssh-program: /usr/local/bin/ssh
  timeout-ms: 5000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.engine.domain, "example.com");
        assert_eq!(config.engine.logdir, Some(PathBuf::from("/var/log/termfleet")));
        assert!(config.engine.overwrite_logs);
        assert_eq!(config.run.connections, 8);
        assert_eq!(config.run.user.as_deref(), Some("admin"));
        assert_eq!(config.run.ssh_auto_verify, Some(true));
        assert!(config.run.no_prompt);
        assert_eq!(config.run.priority.as_deref(), Some("high"));
        assert_eq!(config.protocols.ssh_program, "/usr/local/bin/ssh");
        assert_eq!(config.protocols.timeout_ms, 5000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
run:
  connections: 4
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.run.connections, 4);

        // Defaults for unspecified
        assert_eq!(config.run.protocol, "telnet");
        assert_eq!(config.protocols.telnet_program, "telnet");
        assert_eq!(config.engine.verbose, 0);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tf.yml");
        fs::write(&path, "log-level: warn\nengine:\n  domain: lab.net\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.engine.domain, "lab.net");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/termfleet.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
