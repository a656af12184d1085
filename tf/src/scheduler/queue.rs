//! Queue types for the scheduler

use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::job::{Job, JobId, JobInfo, JobState};
use crate::domain::Priority;

/// A submitted job waiting for a worker
pub(crate) struct QueuedJob {
    pub info: JobInfo,
    pub seq: u64,
    pub submitted_at: Instant,
    pub job: Box<dyn Job>,
    pub state: watch::Sender<JobState>,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher tier first, then earlier submission
        self.info
            .priority
            .cmp(&other.info.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A job currently held by a worker
#[derive(Debug, Clone)]
pub(crate) struct RunningJob {
    pub info: JobInfo,
    pub started_at: Instant,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    /// Queued jobs dropped by a non-graceful shutdown
    pub total_cancelled: u64,
    pub total_run_time_ms: u64,
    /// Most jobs ever queued or running at once
    pub peak_pending: usize,
    pub peak_running: usize,
}

/// Snapshot of the scheduler
#[derive(Debug, Clone)]
pub struct QueueState {
    pub running: usize,
    pub queued: usize,
    pub stats: SchedulerStats,
}

impl QueueState {
    pub fn pending(&self) -> usize {
        self.running + self.queued
    }
}

/// One job in a queue listing
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: JobId,
    pub name: String,
    pub priority: Priority,
    pub status: QueueEntryStatus,
    pub wait_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Queued,
}
