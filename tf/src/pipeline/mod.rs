//! Per-host pipelines
//!
//! A [`Pipeline`] is the ordered list of stages run for one host:
//! Connect, Authenticate, Execute and Close. Once a stage fails or the
//! scheduler asks for an abort, the remaining stages are skipped except
//! Close, which releases the session on every path.

mod builder;
mod log;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{ConnectOptions, Credentials, ProtocolError, ProtocolModule, Session};
use crate::scheduler::Job;
use crate::script::{ScriptError, ScriptProgram};

pub use builder::{BuildError, BuiltPipeline, LogSettings, PipelineBuilder};
pub use log::{HostLog, LoggedSession};

/// Errors raised while running a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage has no open session")]
    NoSession { stage: &'static str },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Aborted before {stage} stage")]
    Aborted { stage: &'static str },

    #[error("Cannot open log: {0}")]
    Log(#[from] std::io::Error),
}

/// One step of a pipeline
pub enum Stage {
    Connect {
        module: Arc<dyn ProtocolModule>,
        host: String,
        options: ConnectOptions,
    },
    Authenticate {
        credentials: Credentials,
        wait: bool,
    },
    Execute(Box<dyn ScriptProgram>),
    Close,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Authenticate { .. } => "authenticate",
            Self::Execute(_) => "execute",
            Self::Close => "close",
        }
    }
}

/// Stages for one host plus its optional log sink
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
    log: Option<HostLog>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            log: None,
        }
    }

    pub fn with_log(mut self, log: HostLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_labels(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::label).collect()
    }

    pub fn log(&self) -> Option<&HostLog> {
        self.log.as_ref()
    }

    /// Run every stage in order
    ///
    /// Returns the first failure. The session opened by Connect is closed
    /// exactly once whether or not an earlier stage failed.
    pub async fn execute(self, abort: &AtomicBool) -> Result<(), PipelineError> {
        debug!(name = %self.name, stages = self.stages.len(), "Pipeline::execute: called");
        let Pipeline { name, stages, log } = self;
        let mut session: Option<Box<dyn Session>> = None;
        let mut failure: Option<PipelineError> = None;

        for stage in stages {
            if let Stage::Close = stage {
                if let Some(mut open) = session.take() {
                    debug!(%name, "Pipeline::execute: closing session");
                    if let Err(e) = open.close().await {
                        warn!(%name, error = %e, "Pipeline::execute: close failed");
                        failure.get_or_insert(e.into());
                    }
                }
                continue;
            }
            if failure.is_some() {
                debug!(%name, stage = stage.label(), "Pipeline::execute: skipping after failure");
                continue;
            }
            if abort.load(Ordering::SeqCst) {
                info!(%name, stage = stage.label(), "Pipeline::execute: abort requested");
                failure = Some(PipelineError::Aborted { stage: stage.label() });
                continue;
            }
            if let Err(e) = run_stage(stage, &mut session, log.as_ref()).await {
                warn!(%name, error = %e, "Pipeline::execute: stage failed");
                failure = Some(e);
            }
        }

        if let Some(mut open) = session.take() {
            debug!(%name, "Pipeline::execute: no close stage, releasing session");
            if let Err(e) = open.close().await {
                failure.get_or_insert(e.into());
            }
        }

        match failure {
            None => Ok(()),
            Some(e) => {
                if let Some(log) = &log
                    && let Err(io) = log.write_error(&e).await
                {
                    warn!(%name, error = %io, "Pipeline::execute: cannot write error log");
                }
                Err(e)
            }
        }
    }
}

async fn run_stage(
    stage: Stage,
    session: &mut Option<Box<dyn Session>>,
    log: Option<&HostLog>,
) -> Result<(), PipelineError> {
    let label = stage.label();
    match stage {
        Stage::Connect { module, host, options } => {
            debug!(%host, module = module.name(), "run_stage: connect");
            let opened = module.open(&host, &options).await?;
            let opened: Box<dyn Session> = match log {
                Some(log) => Box::new(LoggedSession::new(opened, log.open_transcript().await?)),
                None => opened,
            };
            *session = Some(opened);
        }
        Stage::Authenticate { credentials, wait } => {
            let open = session.as_mut().ok_or(PipelineError::NoSession { stage: label })?;
            open.authenticate(&credentials, wait).await?;
        }
        Stage::Execute(mut program) => {
            let open = session.as_mut().ok_or(PipelineError::NoSession { stage: label })?;
            program.run(open.as_mut()).await?;
        }
        Stage::Close => {}
    }
    Ok(())
}

#[async_trait]
impl Job for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, abort: Arc<AtomicBool>) -> Result<(), String> {
        self.execute(&abort).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::{RecordingProtocol, SessionEvent};
    use crate::script::CommandScript;

    fn pipeline(protocol: &RecordingProtocol, host: &str, commands: &[&str]) -> Pipeline {
        let mut pipeline = Pipeline::new(host);
        pipeline.push(Stage::Connect {
            module: Arc::new(protocol.clone()),
            host: host.to_string(),
            options: ConnectOptions::default(),
        });
        pipeline.push(Stage::Authenticate {
            credentials: Credentials::Password {
                username: Some("admin".into()),
                password: None,
            },
            wait: true,
        });
        pipeline.push(Stage::Execute(Box::new(CommandScript::new(
            commands.iter().map(|c| c.to_string()).collect(),
            true,
        ))));
        pipeline.push(Stage::Close);
        pipeline
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let protocol = RecordingProtocol::new();
        let abort = AtomicBool::new(false);

        pipeline(&protocol, "h1", &["show version"]).execute(&abort).await.unwrap();

        let events = protocol.events();
        assert!(matches!(events[0], SessionEvent::Open { .. }));
        assert!(matches!(events[1], SessionEvent::Authenticate { .. }));
        assert!(matches!(events[2], SessionEvent::Execute { .. }));
        assert!(matches!(events[3], SessionEvent::Close { .. }));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_close_runs_once_after_execute_failure() {
        let protocol = RecordingProtocol::new().fail_execute_on("h1");
        let abort = AtomicBool::new(false);

        let err = pipeline(&protocol, "h1", &["a", "b"]).execute(&abort).await.unwrap_err();

        assert!(matches!(err, PipelineError::Script(_)));
        assert_eq!(protocol.commands("h1"), vec!["a"]);
        assert_eq!(protocol.close_count("h1"), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_close() {
        let protocol = RecordingProtocol::new().fail_open_on("h1");
        let abort = AtomicBool::new(false);

        let err = pipeline(&protocol, "h1", &["a"]).execute(&abort).await.unwrap_err();

        assert!(matches!(err, PipelineError::Protocol(_)));
        assert_eq!(protocol.close_count("h1"), 0);
        assert!(protocol.commands("h1").is_empty());
    }

    #[tokio::test]
    async fn test_abort_skips_remaining_stages() {
        let protocol = RecordingProtocol::new();
        let abort = AtomicBool::new(true);

        let err = pipeline(&protocol, "h1", &["a"]).execute(&abort).await.unwrap_err();

        assert!(matches!(err, PipelineError::Aborted { stage: "connect" }));
        assert!(protocol.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_session() {
        let mut pipeline = Pipeline::new("h1");
        pipeline.push(Stage::Execute(Box::new(CommandScript::new(vec!["a".into()], true))));

        let err = pipeline.execute(&AtomicBool::new(false)).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoSession { stage: "execute" }));
    }

    #[tokio::test]
    async fn test_failure_writes_error_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let protocol = RecordingProtocol::new().fail_execute_on("h1");
        let log = HostLog::new(dir.path(), "h1", false);

        let result = pipeline(&protocol, "h1", &["a"])
            .with_log(log.clone())
            .execute(&AtomicBool::new(false))
            .await;

        assert!(result.is_err());
        let error = std::fs::read_to_string(log.error_path()).unwrap();
        assert!(error.contains("injected failure"));
        assert!(log.path().exists());
    }
}
