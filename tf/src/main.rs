//! termfleet - run one command script against many telnet/SSH hosts
//!
//! CLI entry point.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use termfleet::cli::Cli;
use termfleet::config::Config;
use termfleet::engine::{CancelToken, Engine, RunOptions, spawn_signal_listener};
use termfleet::protocol::{ASKPASS_ENV, ProtocolRegistry};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termfleet")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("termfleet.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ssh runs us as its SSH_ASKPASS helper
    if let Ok(secret) = std::env::var(ASKPASS_ENV) {
        println!("{}", secret);
        return Ok(());
    }

    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    debug!(connections = config.run.connections, protocol = %config.run.protocol, "main: effective configuration");

    let code = run(&cli, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: &Cli, config: &Config) -> Result<i32> {
    debug!(script = %cli.script.display(), "run: called");
    let protocols = ProtocolRegistry::standard(&config.protocols).context("Invalid protocol configuration")?;
    let mut engine = Engine::new(config.engine.clone(), protocols);

    for (name, values) in cli.grouped_defines() {
        engine.define(name, values);
    }
    for path in &cli.host_files {
        engine.add_hosts_from_file(path)?;
    }
    for path in &cli.csv_files {
        engine.add_hosts_from_table(path)?;
    }
    engine.add_hosts(&cli.hosts)?;
    if engine.hosts().is_empty() {
        eyre::bail!("No hosts given; pass HOST arguments, --hosts or --csv");
    }

    if let Err(e) = engine.load_from_file(&cli.script) {
        if config.engine.verbose > 0 {
            return Err(eyre::Report::new(e).wrap_err("Failed to load script"));
        }
        eprintln!("{}", e.to_string().red());
        return Ok(1);
    }

    let cancel = CancelToken::new();
    let listener = spawn_signal_listener(cancel.clone()).context("Failed to install signal handlers")?;

    let options = RunOptions::from(&config.run);
    let report = engine.run(&options, &cancel).await?;
    listener.abort();
    info!(?report, "run: finished");

    if report.interrupted {
        println!("Interrupt caught successfully.");
        println!("{} unfinished jobs.", report.unfinished);
        return Ok(1);
    }
    if report.failed > 0 {
        eprintln!(
            "{}",
            format!("{} of {} jobs failed.", report.failed, report.submitted).red()
        );
    }
    Ok(0)
}
