//! Job lifecycle events

use std::sync::Arc;

use super::job::{JobInfo, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Started,
    Completed,
}

/// Delivered to observers when a job is dispatched and when it finishes
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: JobInfo,
    /// Running for Started; Completed or Failed for Completed
    pub state: JobState,
    pub max_concurrent: usize,
}

/// Callback invoked synchronously by the dispatching worker
pub type Observer = Arc<dyn Fn(&JobEvent) + Send + Sync>;
