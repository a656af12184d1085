//! Turns one resolved host into a pipeline

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::{HostLog, Pipeline, Stage};
use crate::domain::{BindingSet, HostRecord, Priority};
use crate::engine::{EngineHandle, RunOptions};
use crate::protocol::{ConnectOptions, Credentials, ProtocolRegistry};
use crate::script::{ScriptCompiler, ScriptEnv, ScriptError, ScriptSource};

/// Errors raised while building a pipeline
#[derive(Debug, Error)]
pub enum BuildError {
    /// The host is skipped; the run goes on
    #[error("Unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error(transparent)]
    Compile(#[from] ScriptError),
}

/// Per-host log settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub overwrite: bool,
}

/// A pipeline and the tier it should be queued at
pub struct BuiltPipeline {
    pub pipeline: Pipeline,
    pub priority: Priority,
}

/// Assembles Connect, Authenticate, Execute and Close stages per host
pub struct PipelineBuilder {
    protocols: ProtocolRegistry,
    compiler: Arc<dyn ScriptCompiler>,
    domain: String,
    logging: Option<LogSettings>,
}

impl PipelineBuilder {
    pub fn new(protocols: ProtocolRegistry, compiler: Arc<dyn ScriptCompiler>, domain: impl Into<String>) -> Self {
        Self {
            protocols,
            compiler,
            domain: domain.into(),
            logging: None,
        }
    }

    pub fn with_logging(mut self, logging: Option<LogSettings>) -> Self {
        self.logging = logging;
        self
    }

    pub fn build(
        &self,
        record: &HostRecord,
        bindings: BindingSet,
        source: &ScriptSource,
        engine: EngineHandle,
        options: &RunOptions,
    ) -> Result<BuiltPipeline, BuildError> {
        let host = record.qualified_hostname(&self.domain);
        debug!(%host, protocol = %record.protocol, "PipelineBuilder::build: called");

        let entry = self
            .protocols
            .lookup(&record.protocol)
            .ok_or_else(|| BuildError::UnsupportedProtocol(record.protocol.tag().to_string()))?;

        let program = self.compiler.compile(
            source,
            ScriptEnv {
                bindings,
                engine,
                wait: !options.no_prompt,
            },
        )?;

        let mut pipeline = Pipeline::new(host.clone());
        if let Some(logging) = &self.logging {
            debug!(%host, dir = %logging.dir.display(), "PipelineBuilder::build: logging enabled");
            pipeline = pipeline.with_log(HostLog::new(&logging.dir, &host, logging.overwrite));
        }

        pipeline.push(Stage::Connect {
            module: entry.module.clone(),
            host,
            options: ConnectOptions {
                port: record.port,
                echo: options.connections == 1 && !options.no_echo,
                auto_verify: options.ssh_auto_verify,
                ssh_version: entry.ssh_version,
            },
        });

        if !options.no_authentication {
            pipeline.push(Stage::Authenticate {
                credentials: credentials(record, options),
                wait: !options.no_initial_prompt && !options.no_prompt,
            });
        }

        pipeline.push(Stage::Execute(program));
        pipeline.push(Stage::Close);

        Ok(BuiltPipeline {
            pipeline,
            priority: Priority::from_option(options.priority.as_deref()),
        })
    }
}

/// Host URL credentials win over the run-wide defaults
fn credentials(record: &HostRecord, options: &RunOptions) -> Credentials {
    let username = record.username.clone().or_else(|| options.user.clone());
    match &options.ssh_key {
        Some(key_file) => Credentials::KeyFile {
            username,
            key_file: key_file.clone(),
        },
        None => Credentials::Password {
            username,
            password: record.password.clone().or_else(|| options.password.clone()),
        },
    }
}
