//! Script compilation seam
//!
//! A [`ScriptCompiler`] turns source text plus one host's bindings into a
//! [`ScriptProgram`]. Every host gets its own compiled program; programs are
//! never shared between jobs.

mod template;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::BindingSet;
use crate::engine::EngineHandle;
use crate::protocol::{ProtocolError, Session};

pub use template::{CommandScript, TemplateCompiler};

const ANONYMOUS_ORIGIN: &str = "<script>";

/// Script compilation and execution errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{origin}: {message}")]
    Compile { origin: String, message: String },

    #[error(transparent)]
    Session(#[from] ProtocolError),
}

/// Script source text and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub code: String,
    /// File name, exposed to scripts as `__filename__`
    pub origin: Option<String>,
}

impl ScriptSource {
    pub fn new(code: impl Into<String>, origin: Option<String>) -> Self {
        Self {
            code: code.into(),
            origin,
        }
    }

    pub fn origin_label(&self) -> &str {
        self.origin.as_deref().unwrap_or(ANONYMOUS_ORIGIN)
    }
}

/// Everything a program sees at compile time
#[derive(Clone)]
pub struct ScriptEnv {
    pub bindings: BindingSet,
    /// Back-reference to the owning engine
    pub engine: EngineHandle,
    /// Wait for the prompt after each command; otherwise only send it
    pub wait: bool,
}

/// Compiles source text into per-host programs
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, source: &ScriptSource, env: ScriptEnv) -> Result<Box<dyn ScriptProgram>, ScriptError>;
}

/// A compiled program bound to one host
#[async_trait]
pub trait ScriptProgram: Send {
    async fn run(&mut self, session: &mut dyn Session) -> Result<(), ScriptError>;
}
