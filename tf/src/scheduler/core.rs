//! Scheduler implementation

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::Priority;

use super::SchedulerError;
use super::config::SchedulerConfig;
use super::events::{JobEvent, JobEventKind, Observer};
use super::job::{Job, JobHandle, JobId, JobInfo, JobState};
use super::queue::{QueueEntry, QueueEntryStatus, QueueState, QueuedJob, RunningJob, SchedulerStats};

/// Internal state protected by mutex
struct SchedulerInner {
    /// Priority queue of waiting jobs
    queue: BinaryHeap<QueuedJob>,

    /// Jobs currently held by a worker
    running: HashMap<JobId, RunningJob>,

    next_seq: u64,
    started: bool,
    stopping: bool,
    workers: Vec<JoinHandle<()>>,

    /// Statistics
    stats: SchedulerStats,
}

impl SchedulerInner {
    fn pending(&self) -> usize {
        self.queue.len() + self.running.len()
    }
}

/// The Scheduler runs jobs on a fixed pool of workers, at most
/// `max_concurrent` at a time, in tier order.
pub struct Scheduler {
    max_concurrent: AtomicUsize,
    inner: Mutex<SchedulerInner>,
    /// Wakes idle workers
    notify: Notify,
    /// Fires whenever a job leaves the pending set
    done: Notify,
    abort: Arc<AtomicBool>,
    observers: RwLock<Vec<Observer>>,
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        debug!(?config, "Scheduler::new: called");
        Self {
            max_concurrent: AtomicUsize::new(config.max_concurrent.max(1)),
            inner: Mutex::new(SchedulerInner {
                queue: BinaryHeap::new(),
                running: HashMap::new(),
                next_seq: 0,
                started: false,
                stopping: false,
                workers: Vec::new(),
                stats: SchedulerStats::default(),
            }),
            notify: Notify::new(),
            done: Notify::new(),
            abort: Arc::new(AtomicBool::new(false)),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Change the worker count; only allowed before `start`
    pub async fn set_max_concurrent(&self, max_concurrent: usize) -> Result<(), SchedulerError> {
        debug!(max_concurrent, "Scheduler::set_max_concurrent: called");
        let inner = self.inner.lock().await;
        if inner.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        self.max_concurrent.store(max_concurrent.max(1), Ordering::SeqCst);
        Ok(())
    }

    /// Register a lifecycle observer
    pub fn subscribe(&self, observer: Observer) {
        debug!("Scheduler::subscribe: called");
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Spawn the workers
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if inner.started {
            debug!("Scheduler::start: already started");
            return Err(SchedulerError::AlreadyStarted);
        }
        let workers = self.max_concurrent();
        debug!(workers, "Scheduler::start: called");

        inner.started = true;
        inner.stopping = false;
        self.abort.store(false, Ordering::SeqCst);
        for worker in 0..workers {
            inner.workers.push(tokio::spawn(self.clone().worker_loop(worker)));
        }
        drop(inner);

        info!(workers, "Scheduler started");
        Ok(())
    }

    /// Queue a job; never waits for a free worker
    pub async fn submit(&self, job: Box<dyn Job>, priority: Priority) -> JobHandle {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let info = JobInfo {
            id: seq,
            name: job.name().to_string(),
            priority,
        };
        debug!(id = seq, name = %info.name, ?priority, "Scheduler::submit: called");

        let (tx, rx) = watch::channel(JobState::Pending);
        inner.queue.push(QueuedJob {
            info: info.clone(),
            seq,
            submitted_at: Instant::now(),
            job,
            state: tx,
        });
        inner.stats.total_submitted += 1;
        inner.stats.peak_pending = inner.stats.peak_pending.max(inner.pending());
        drop(inner);

        self.notify.notify_waiters();
        JobHandle::new(info, rx)
    }

    /// Jobs not yet Completed or Failed (queued plus running)
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending()
    }

    /// Block until at most `limit` jobs are pending
    pub async fn wait_until_pending_at_most(&self, limit: usize) {
        debug!(limit, "Scheduler::wait_until_pending_at_most: called");
        loop {
            let done = self.done.notified();
            tokio::pin!(done);
            done.as_mut().enable();

            if self.pending_count().await <= limit {
                return;
            }
            done.await;
        }
    }

    /// Stop the workers
    ///
    /// Graceful shutdown first waits for every queued and running job.
    /// Otherwise running jobs are asked to abort after their current stage
    /// and queued jobs are dropped undispatched, their handles resolving to
    /// `Cancelled`. Returns the number of jobs dropped. The scheduler can be
    /// started again afterwards with an empty queue.
    pub async fn shutdown(&self, graceful: bool) -> usize {
        debug!(graceful, "Scheduler::shutdown: called");
        if graceful {
            self.wait_until_pending_at_most(0).await;
        } else {
            self.abort.store(true, Ordering::SeqCst);
        }

        let workers = {
            let mut inner = self.inner.lock().await;
            inner.stopping = true;
            std::mem::take(&mut inner.workers)
        };
        self.notify.notify_waiters();

        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(error = %e, "Scheduler::shutdown: worker ended abnormally");
            }
        }

        let mut inner = self.inner.lock().await;
        inner.started = false;
        inner.stopping = false;
        self.abort.store(false, Ordering::SeqCst);
        let left: Vec<QueuedJob> = inner.queue.drain().collect();
        inner.stats.total_cancelled += left.len() as u64;
        drop(inner);

        for queued in &left {
            debug!(id = queued.info.id, name = %queued.info.name, "Scheduler::shutdown: dropping queued job");
            let _ = queued.state.send(JobState::Cancelled);
        }
        if !left.is_empty() {
            self.done.notify_waiters();
        }
        info!(left = left.len(), "Scheduler shut down");
        left.len()
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let inner = self.inner.lock().await;

        QueueState {
            running: inner.running.len(),
            queued: inner.queue.len(),
            stats: inner.stats.clone(),
        }
    }

    /// Running jobs first, then queued jobs in dispatch order
    pub async fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        let inner = self.inner.lock().await;
        let now = Instant::now();

        let mut running: Vec<_> = inner.running.values().collect();
        running.sort_by_key(|r| r.info.id);
        let mut queued: Vec<_> = inner.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));

        running
            .into_iter()
            .map(|r| QueueEntry {
                id: r.info.id,
                name: r.info.name.clone(),
                priority: r.info.priority,
                status: QueueEntryStatus::Running,
                wait_time: now - r.started_at,
            })
            .chain(queued.into_iter().map(|q| QueueEntry {
                id: q.info.id,
                name: q.info.name.clone(),
                priority: q.info.priority,
                status: QueueEntryStatus::Queued,
                wait_time: now - q.submitted_at,
            }))
            .collect()
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.inner.lock().await.stats.clone()
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Scheduler::worker_loop: called");
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut inner = self.inner.lock().await;
                if inner.stopping || self.abort.load(Ordering::SeqCst) {
                    debug!(worker, "Scheduler::worker_loop: stopping");
                    return;
                }
                let next = inner.queue.pop();
                if let Some(job) = &next {
                    inner.running.insert(
                        job.info.id,
                        RunningJob {
                            info: job.info.clone(),
                            started_at: Instant::now(),
                        },
                    );
                    inner.stats.peak_running = inner.stats.peak_running.max(inner.running.len());
                }
                next
            };

            match next {
                Some(job) => self.run_job(worker, job).await,
                None => notified.await,
            }
        }
    }

    async fn run_job(&self, worker: usize, queued: QueuedJob) {
        let QueuedJob { info, job, state, .. } = queued;
        debug!(worker, id = info.id, name = %info.name, "Scheduler::run_job: called");
        let started_at = Instant::now();

        let _ = state.send(JobState::Running);
        self.emit(JobEventKind::Started, &info, JobState::Running);

        // A panicking job only takes down its own task
        let abort = self.abort.clone();
        let outcome = tokio::spawn(async move { job.run(abort).await }).await;
        let final_state = match outcome {
            Ok(Ok(())) => JobState::Completed,
            Ok(Err(reason)) => JobState::Failed(reason),
            Err(e) => JobState::Failed(format!("job panicked: {}", e)),
        };
        if let JobState::Failed(reason) = &final_state {
            warn!(id = info.id, name = %info.name, %reason, "Job failed");
        }

        self.emit(JobEventKind::Completed, &info, final_state.clone());
        {
            let mut inner = self.inner.lock().await;
            inner.running.remove(&info.id);
            match final_state {
                JobState::Completed => inner.stats.total_completed += 1,
                _ => inner.stats.total_failed += 1,
            }
            inner.stats.total_run_time_ms += started_at.elapsed().as_millis() as u64;
        }
        let _ = state.send(final_state);
        self.done.notify_waiters();
    }

    fn emit(&self, kind: JobEventKind, info: &JobInfo, state: JobState) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if observers.is_empty() {
            return;
        }
        let event = JobEvent {
            kind,
            job: info.clone(),
            state,
            max_concurrent: self.max_concurrent(),
        };
        for observer in &observers {
            observer(&event);
        }
    }
}
