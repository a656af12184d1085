//! Bounded-concurrency job scheduler
//!
//! Runs up to `max_concurrent` jobs at once from a tier-ordered queue.
//! Forced jobs dispatch before High, High before Normal; within a tier,
//! jobs dispatch in submission order.

mod config;
mod core;
mod events;
mod job;
mod queue;

use thiserror::Error;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use events::{JobEvent, JobEventKind, Observer};
pub use job::{Job, JobHandle, JobId, JobInfo, JobState};
pub use queue::{QueueEntry, QueueEntryStatus, QueueState, SchedulerStats};

/// Scheduler lifecycle errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler already started")]
    AlreadyStarted,
}
