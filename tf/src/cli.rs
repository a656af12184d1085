//! CLI definition

use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

/// termfleet - run one command script against many hosts
#[derive(Debug, Parser)]
#[command(
    name = "tf",
    about = "Run an interactive command script against many telnet/SSH hosts concurrently",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/termfleet/logs/termfleet.log"
)]
pub struct Cli {
    /// Script file to run on every host
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Host URLs, e.g. r1, ssh://user@r2:2222?var=value
    #[arg(value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level for the diagnostic log file
    #[arg(short, long, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    /// File with one host URL per line
    #[arg(long = "hosts", value_name = "FILE")]
    pub host_files: Vec<PathBuf>,

    /// Tab-separated host table whose header starts with "hostname"
    #[arg(long = "csv", value_name = "FILE")]
    pub csv_files: Vec<PathBuf>,

    /// Global variable; repeat a name to give it several values
    #[arg(short, long = "define", value_name = "NAME=VALUE", value_parser = parse_define)]
    pub defines: Vec<(String, String)>,

    /// Hosts contacted at once
    #[arg(short = 'n', long)]
    pub connections: Option<usize>,

    /// Domain appended to hostnames without a dot
    #[arg(long)]
    pub domain: Option<String>,

    /// Write <host>.log and <host>.log.error into this directory
    #[arg(long)]
    pub logdir: Option<PathBuf>,

    /// Truncate existing host logs instead of appending
    #[arg(long)]
    pub overwrite_logs: bool,

    /// Login name for hosts whose URL has none
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password for hosts whose URL has none
    #[arg(long)]
    pub password: Option<String>,

    /// Protocol for hosts whose URL has none (telnet, ssh, ssh1, ssh2)
    #[arg(long)]
    pub protocol: Option<String>,

    /// Never mirror host output to the terminal
    #[arg(long)]
    pub no_echo: bool,

    /// Authenticate with this SSH key instead of a password
    #[arg(long, value_name = "FILE")]
    pub ssh_key: Option<PathBuf>,

    /// Accept unknown SSH host keys
    #[arg(long)]
    pub ssh_auto_verify: bool,

    /// Do not wait for the prompt after logging in
    #[arg(long)]
    pub no_initial_prompt: bool,

    /// Never wait for a prompt; commands are only sent
    #[arg(long)]
    pub no_prompt: bool,

    /// Skip the authentication step
    #[arg(long)]
    pub no_authentication: bool,

    /// Queue priority: force, high or normal
    #[arg(long)]
    pub priority: Option<String>,

    /// Print engine progress; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print compiled commands; repeat for more
    #[arg(long, action = clap::ArgAction::Count)]
    pub parser_verbose: u8,
}

impl Cli {
    /// Group repeated `--define` names, keeping first-seen order
    pub fn grouped_defines(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in &self.defines {
            match grouped.iter_mut().find(|(n, _)| n == name) {
                Some((_, values)) => values.push(value.clone()),
                None => grouped.push((name.clone(), vec![value.clone()])),
            }
        }
        grouped
    }

    /// Overlay flags onto the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(connections) = self.connections {
            config.run.connections = connections;
        }
        if let Some(domain) = &self.domain {
            config.engine.domain = domain.clone();
        }
        if let Some(logdir) = &self.logdir {
            config.engine.logdir = Some(logdir.clone());
        }
        if let Some(user) = &self.user {
            config.run.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.run.password = Some(password.clone());
        }
        if let Some(protocol) = &self.protocol {
            config.run.protocol = protocol.clone();
        }
        if let Some(ssh_key) = &self.ssh_key {
            config.run.ssh_key = Some(ssh_key.clone());
        }
        if let Some(priority) = &self.priority {
            config.run.priority = Some(priority.clone());
        }
        if self.ssh_auto_verify {
            config.run.ssh_auto_verify = Some(true);
        }
        config.engine.overwrite_logs |= self.overwrite_logs;
        config.run.no_echo |= self.no_echo;
        config.run.no_initial_prompt |= self.no_initial_prompt;
        config.run.no_prompt |= self.no_prompt;
        config.run.no_authentication |= self.no_authentication;
        config.engine.verbose = config.engine.verbose.max(self.verbose);
        config.engine.parser_verbose = config.engine.parser_verbose.max(self.parser_verbose);
    }
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from(["tf", "check.tf", "r1", "ssh://r2"]).unwrap();
        assert_eq!(cli.script, PathBuf::from("check.tf"));
        assert_eq!(cli.hosts, vec!["r1", "ssh://r2"]);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_repeated_defines_accumulate() {
        let cli = Cli::try_parse_from(["tf", "s.tf", "-d", "vlan=10", "--define", "site=ams", "-d", "vlan=20"]).unwrap();
        assert_eq!(
            cli.grouped_defines(),
            vec![
                ("vlan".to_string(), vec!["10".to_string(), "20".to_string()]),
                ("site".to_string(), vec!["ams".to_string()]),
            ]
        );
    }

    #[test]
    fn test_bad_define_rejected() {
        assert!(Cli::try_parse_from(["tf", "s.tf", "-d", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["tf", "s.tf", "-d", "=x"]).is_err());
    }

    #[test]
    fn test_apply_overrides_config() {
        let cli = Cli::try_parse_from([
            "tf",
            "s.tf",
            "-n",
            "8",
            "--domain",
            "lab.net",
            "--protocol",
            "ssh",
            "--ssh-auto-verify",
            "--no-prompt",
            "--priority",
            "force",
            "-vv",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.run.connections, 8);
        assert_eq!(config.engine.domain, "lab.net");
        assert_eq!(config.run.protocol, "ssh");
        assert_eq!(config.run.ssh_auto_verify, Some(true));
        assert!(config.run.no_prompt);
        assert!(!config.run.no_echo);
        assert_eq!(config.run.priority.as_deref(), Some("force"));
        assert_eq!(config.engine.verbose, 2);
    }

    #[test]
    fn test_apply_keeps_config_when_flags_absent() {
        let cli = Cli::try_parse_from(["tf", "s.tf"]).unwrap();
        let mut config = Config::default();
        config.run.connections = 4;
        config.run.no_echo = true;
        cli.apply(&mut config);
        assert_eq!(config.run.connections, 4);
        assert!(config.run.no_echo);
        assert_eq!(config.run.ssh_auto_verify, None);
    }
}
