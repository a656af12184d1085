//! Run loop
//!
//! The [`Engine`] holds the host list, the variable definitions and the
//! loaded script. `run` resolves and builds one pipeline per host, submits
//! it to the scheduler while bounding how many are in memory, then waits
//! for the queue to drain or for a cancellation.

mod core;
mod error;
mod handle;
mod options;
mod signals;

pub use core::{Engine, RunReport};
pub use error::EngineError;
pub use handle::EngineHandle;
pub use options::RunOptions;
pub use signals::{CancelToken, INTERRUPT_BANNER, spawn_signal_listener};
