//! Engine implementation

use std::fmt::Display;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use colored::Colorize;
use tracing::{debug, error, info, warn};

use super::{CancelToken, EngineError, EngineHandle, RunOptions};
use crate::config::EngineConfig;
use crate::domain::{DefineTable, HostRecord};
use crate::hosts;
use crate::pipeline::{BuildError, LogSettings, PipelineBuilder};
use crate::protocol::ProtocolRegistry;
use crate::resolver::{Prompter, ReadlinePrompter, VariableResolver};
use crate::scheduler::{JobEvent, JobEventKind, JobState, Scheduler, SchedulerConfig, SchedulerStats};
use crate::script::{ScriptCompiler, ScriptEnv, ScriptSource, TemplateCompiler};

/// Protocol used to parse host URLs at add time
const ADD_TIME_PROTOCOL: &str = "telnet";

/// Outcome of one `Engine::run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Hosts in the host list
    pub hosts: usize,
    /// Pipelines handed to the scheduler
    pub submitted: usize,
    /// Hosts skipped for an unsupported protocol
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub interrupted: bool,
    /// Hosts never submitted plus jobs still queued when interrupted
    pub unfinished: usize,
}

/// Runs one script against many hosts
pub struct Engine {
    config: EngineConfig,
    defines: Arc<RwLock<DefineTable>>,
    hosts: Arc<RwLock<Vec<String>>>,
    script: Option<ScriptSource>,
    compiler: Arc<dyn ScriptCompiler>,
    protocols: ProtocolRegistry,
    prompter: Arc<dyn Prompter>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn new(config: EngineConfig, protocols: ProtocolRegistry) -> Self {
        debug!(?config, "Engine::new: called");
        let scheduler = Arc::new(Scheduler::new(SchedulerConfig::default()));
        scheduler.subscribe(Arc::new(print_progress));
        Self {
            compiler: Arc::new(TemplateCompiler::new(config.parser_verbose)),
            config,
            defines: Arc::new(RwLock::new(DefineTable::new())),
            hosts: Arc::new(RwLock::new(Vec::new())),
            script: None,
            protocols,
            prompter: Arc::new(ReadlinePrompter),
            scheduler,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn ScriptCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.defines.clone(), self.hosts.clone())
    }

    /// Host URLs in run order
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy of the current definitions
    pub fn defines(&self) -> DefineTable {
        self.defines.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Set a global variable
    pub fn define(&self, name: impl Into<String>, values: Vec<String>) {
        self.defines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .define(name, values);
    }

    /// Set a variable for one host, keyed by the hostname as written in its URL
    pub fn define_host(&self, hostname: &str, name: impl Into<String>, values: Vec<String>) {
        self.defines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .define_host(hostname, name, values);
    }

    /// Add one host URL; malformed URLs are rejected here
    pub fn add_host(&self, url: &str) -> Result<(), EngineError> {
        debug!(%url, "Engine::add_host: called");
        let record = HostRecord::parse(url, ADD_TIME_PROTOCOL)?;
        self.defines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_host(&record.hostname);
        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }

    pub fn add_hosts<I, S>(&self, urls: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for url in urls {
            self.add_host(url.as_ref())?;
        }
        Ok(())
    }

    /// Add every host listed in a host list file
    pub fn add_hosts_from_file(&self, path: &Path) -> Result<(), EngineError> {
        debug!(?path, "Engine::add_hosts_from_file: called");
        let urls = hosts::read_host_list(path)?;
        self.add_hosts(urls)
    }

    /// Add the hosts of a host table and append its columns to their variables
    ///
    /// Consecutive rows for the same hostname add the host once and
    /// accumulate one value per row.
    pub fn add_hosts_from_table(&self, path: &Path) -> Result<(), EngineError> {
        debug!(?path, "Engine::add_hosts_from_table: called");
        let table = hosts::read_host_table(path)?;

        let mut last_hostname = String::new();
        for row in &table.rows {
            let hostname = HostRecord::parse(&row.host_url, ADD_TIME_PROTOCOL)?.hostname;
            if hostname != last_hostname {
                self.add_host(&row.host_url)?;
                last_hostname = hostname.clone();
            }

            let mut defines = self.defines.write().unwrap_or_else(PoisonError::into_inner);
            for (column, value) in table.row_vars(row) {
                defines.append_host_value(&hostname, column, value);
            }
        }
        Ok(())
    }

    /// Compile `code` once against the first host to surface errors early
    ///
    /// The first host's bindings are merged as for a run, except that
    /// placeholders are left as typed.
    pub fn load(&mut self, code: impl Into<String>) -> Result<(), EngineError> {
        self.load_source(ScriptSource::new(code, None))
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<(), EngineError> {
        debug!(?path, "Engine::load_from_file: called");
        let code = std::fs::read_to_string(path).map_err(|source| EngineError::ScriptFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_source(ScriptSource::new(code, Some(path.display().to_string())))
    }

    pub fn load_source(&mut self, source: ScriptSource) -> Result<(), EngineError> {
        debug!(origin = %source.origin_label(), "Engine::load_source: called");
        let first = self.hosts().into_iter().next().ok_or(EngineError::NoHosts)?;
        let record = HostRecord::parse(&first, ADD_TIME_PROTOCOL)?;

        // Placeholders stay unfilled; nobody is prompted at load time
        let resolver = VariableResolver::new(&self.config.domain, ADD_TIME_PROTOCOL, self.prompter.clone());
        let bindings = {
            let defines = self.defines.read().unwrap_or_else(PoisonError::into_inner);
            resolver.bind(&record, &defines)
        };

        self.compiler.compile(
            &source,
            ScriptEnv {
                bindings,
                engine: self.handle(),
                wait: true,
            },
        )?;
        self.script = Some(source);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.script.is_some()
    }

    /// Run the loaded script on every host
    ///
    /// Hosts are visited once, in order. Building pauses while `2 ×
    /// connections` jobs are pending. A cancellation stops submitting,
    /// aborts running jobs after their current stage and reports what was
    /// left undone.
    pub async fn run(&self, options: &RunOptions, cancel: &CancelToken) -> Result<RunReport, EngineError> {
        debug!(connections = options.connections, protocol = %options.protocol, "Engine::run: called");
        let script = self.script.clone().ok_or(EngineError::NotLoaded)?;
        let connections = options.connections.max(1);
        let backlog = 2 * connections - 1;

        self.scheduler.set_max_concurrent(connections).await?;
        self.dbg(1, "Starting engine...");
        self.scheduler.start().await?;
        self.dbg(1, "Engine running.");
        let baseline = self.scheduler.stats().await;

        let resolver = VariableResolver::new(&self.config.domain, &options.protocol, self.prompter.clone());
        let builder = PipelineBuilder::new(self.protocols.clone(), self.compiler.clone(), &self.config.domain)
            .with_logging(self.config.logdir.clone().map(|dir| LogSettings {
                dir,
                overwrite: self.config.overwrite_logs,
            }));

        let hosts = self.hosts();
        let mut report = RunReport {
            hosts: hosts.len(),
            ..Default::default()
        };

        self.dbg(1, "Building sequence...");
        for (index, url) in hosts.iter().enumerate() {
            let remaining = hosts.len() - index;
            if cancel.is_cancelled() {
                return Ok(self.interrupted(report, remaining, &baseline, options).await);
            }
            tokio::select! {
                _ = self.scheduler.wait_until_pending_at_most(backlog) => {}
                _ = cancel.cancelled() => {
                    return Ok(self.interrupted(report, remaining, &baseline, options).await);
                }
            }

            self.dbg(1, format!("Building sequence for {}.", url));
            let resolved = {
                let mut defines = self.defines.write().unwrap_or_else(PoisonError::into_inner);
                resolver.resolve(url, &mut defines)
            };
            let (record, bindings) = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.scheduler.shutdown(false).await;
                    return Err(e.into());
                }
            };

            match builder.build(&record, bindings, &script, self.handle(), options) {
                Ok(built) => {
                    self.scheduler
                        .submit(Box::new(built.pipeline), built.priority)
                        .await;
                    report.submitted += 1;
                }
                Err(BuildError::UnsupportedProtocol(protocol)) => {
                    warn!(%url, %protocol, "Engine::run: skipping host");
                    println!("{}", format!("Unsupported protocol {}", protocol).yellow());
                    report.skipped += 1;
                }
                Err(BuildError::Compile(e)) => {
                    error!(%url, error = %e, "Engine::run: compile failed");
                    self.scheduler.shutdown(false).await;
                    return Err(e.into());
                }
            }
        }

        self.dbg(1, "All actions enqueued.");
        tokio::select! {
            _ = self.scheduler.wait_until_pending_at_most(0) => {}
            _ = cancel.cancelled() => {
                return Ok(self.interrupted(report, 0, &baseline, options).await);
            }
        }

        self.dbg(1, "Shutting down engine...");
        self.scheduler.shutdown(true).await;
        self.dbg(1, "Engine shut down.");

        self.tally(&mut report, &baseline).await;
        info!(?report, "Engine::run: complete");
        Ok(report)
    }

    async fn interrupted(
        &self,
        mut report: RunReport,
        unsubmitted: usize,
        baseline: &SchedulerStats,
        options: &RunOptions,
    ) -> RunReport {
        debug!(unsubmitted, "Engine::interrupted: called");
        let state = self.scheduler.queue_state().await;
        report.interrupted = true;
        report.unfinished = unsubmitted + state.queued;

        match tokio::time::timeout(options.shutdown_timeout, self.scheduler.shutdown(false)).await {
            Ok(left) => debug!(left, "Engine::interrupted: scheduler stopped"),
            Err(_) => warn!(timeout = ?options.shutdown_timeout, "Engine::interrupted: shutdown timed out"),
        }

        self.tally(&mut report, baseline).await;
        info!(?report, "Engine::run: interrupted");
        report
    }

    async fn tally(&self, report: &mut RunReport, baseline: &SchedulerStats) {
        let stats = self.scheduler.stats().await;
        report.completed = (stats.total_completed - baseline.total_completed) as usize;
        report.failed = (stats.total_failed - baseline.total_failed) as usize;
    }

    fn dbg(&self, level: u8, message: impl Display) {
        if level <= self.config.verbose {
            println!("{}", message);
        }
    }
}

/// Progress lines, only when more than one host runs at a time
fn print_progress(event: &JobEvent) {
    if event.max_concurrent <= 1 {
        return;
    }
    match (&event.kind, &event.state) {
        (JobEventKind::Started, _) => println!("{} started.", event.job.name),
        (JobEventKind::Completed, JobState::Failed(reason)) => {
            println!("{}", format!("{} failed: {}", event.job.name, reason).red())
        }
        (JobEventKind::Completed, _) => println!("{} completed.", event.job.name),
    }
}
