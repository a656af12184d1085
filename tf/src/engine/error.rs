//! Engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::HostError;
use crate::hosts::HostFileError;
use crate::resolver::ResolveError;
use crate::scheduler::SchedulerError;
use crate::script::ScriptError;

/// Errors that end a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A script was not yet loaded using load()")]
    NotLoaded,

    #[error("No hosts were added")]
    NoHosts,

    #[error("Cannot read script {path}: {source}")]
    ScriptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    HostFile(#[from] HostFileError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
