//! Jobs and job handles

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::Priority;

pub type JobId = u64;

/// Work the scheduler can run
#[async_trait]
pub trait Job: Send + 'static {
    /// Display name used in progress output
    fn name(&self) -> &str;

    /// Run to completion; `abort` asks the job to stop after its current step
    async fn run(self: Box<Self>, abort: Arc<AtomicBool>) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed(String),
    /// Dropped from the queue by a non-graceful shutdown; never ran
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub priority: Priority,
}

/// Returned by `submit`; tracks one job's state
#[derive(Debug, Clone)]
pub struct JobHandle {
    info: JobInfo,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub(crate) fn new(info: JobInfo, state: watch::Receiver<JobState>) -> Self {
        Self { info, state }
    }

    pub fn id(&self) -> JobId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn priority(&self) -> Priority {
        self.info.priority
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Wait for Completed, Failed or Cancelled
    ///
    /// Returns the last known state if the scheduler drops the job first.
    pub async fn wait(&self) -> JobState {
        let mut rx = self.state.clone();
        let result = rx.wait_for(JobState::is_terminal).await.map(|state| state.clone());
        result.unwrap_or_else(|_| rx.borrow().clone())
    }
}
