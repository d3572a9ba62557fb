//! In-process verification job queue with bounded concurrency.
//!
//! `enqueue` only registers the job; a single dispatch task admits queued jobs in
//! FIFO order while fewer than `max_concurrent` are running, and runs each one on
//! its own task. Completion order is not guaranteed.
//!
//! The registry, the pending queue and the active-worker counter share one lock.
//! A job becomes `Processing` in the same critical section that takes its worker
//! slot, so the number of `Processing` jobs never exceeds `max_concurrent`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::{JobStatus, VerificationJob};
use crate::models::verification::VerificationResult;
use crate::services::workflow::WorkflowError;

/// How often the dispatcher sweeps finished jobs out of the registry.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Runs one job to completion.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: VerificationJob) -> Result<VerificationResult, WorkflowError>;
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    /// Finished jobs older than this are evicted. `None` keeps them forever.
    pub retention: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retention: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub active_workers: usize,
    pub max_concurrent: usize,
}

struct QueueState {
    jobs: HashMap<Uuid, VerificationJob>,
    pending: VecDeque<Uuid>,
    active_workers: usize,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Woken on enqueue and whenever a worker frees its slot.
    wakeup: Notify,
    max_concurrent: usize,
    retention: Option<Duration>,
}

/// In-memory job registry and dispatcher.
///
/// Construct one per process and share it (e.g. through `AppState`).
pub struct JobQueue {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    jobs: HashMap::new(),
                    pending: VecDeque::new(),
                    active_workers: 0,
                }),
                wakeup: Notify::new(),
                max_concurrent: config.max_concurrent.max(1),
                retention: config.retention,
            }),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Register a job for `property_id` and return it in state `Queued`.
    /// Never waits for execution.
    pub fn enqueue(&self, property_id: i64) -> Result<VerificationJob, QueueError> {
        let job = VerificationJob::new(property_id);
        {
            let mut state = self.shared.lock()?;
            state.jobs.insert(job.job_id, job.clone());
            state.pending.push_back(job.job_id);
            metrics::gauge!("verification_queue_depth").set(state.pending.len() as f64);
        }
        self.shared.wakeup.notify_one();
        metrics::counter!("verification_jobs_total").increment(1);

        tracing::info!(job_id = %job.job_id, property_id, "Job enqueued");
        Ok(job)
    }

    /// Snapshot of a job. Never changes queue state.
    pub fn get_job(&self, job_id: Uuid) -> Result<Option<VerificationJob>, QueueError> {
        Ok(self.shared.lock()?.jobs.get(&job_id).cloned())
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.shared.lock()?;
        let count = |status: JobStatus| state.jobs.values().filter(|j| j.status == status).count();
        Ok(QueueStats {
            queued: count(JobStatus::Queued),
            processing: count(JobStatus::Processing),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
            total: state.jobs.len(),
            active_workers: state.active_workers,
            max_concurrent: self.shared.max_concurrent,
        })
    }

    /// Remove finished jobs whose `completed_at` is older than the retention window.
    /// Returns the number of jobs removed.
    pub fn evict_finished(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        self.shared.evict_finished(now)
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher
            .lock()
            .map(|d| d.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Start dispatching queued jobs to `handler`. A second call while the
    /// dispatcher is running is ignored.
    pub fn start(&self, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        let mut dispatcher = self.dispatcher.lock().map_err(|_| QueueError::Poisoned)?;
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("Job queue dispatcher already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        *dispatcher = Some(tokio::spawn(dispatch_loop(shared, handler)));
        tracing::info!(max_concurrent = self.shared.max_concurrent, "Job queue dispatcher started");
        Ok(())
    }

    /// Stop admitting jobs. Jobs already running are left to finish; queued jobs
    /// stay queued until the next `start`.
    pub async fn stop(&self) {
        let handle = match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation is the expected outcome
            let _ = handle.await;
            tracing::info!("Job queue dispatcher stopped");
        }
    }
}

impl Shared {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::Poisoned)
    }

    /// Take the next queued job if a worker slot is free, marking it `Processing`.
    fn admit_next(&self) -> Result<Option<VerificationJob>, QueueError> {
        let mut state = self.lock()?;
        if state.active_workers >= self.max_concurrent {
            return Ok(None);
        }

        while let Some(job_id) = state.pending.pop_front() {
            let now = Utc::now();
            let admitted = match state.jobs.get_mut(&job_id) {
                Some(job) => job.mark_processing(now).then(|| job.clone()),
                None => None,
            };
            if let Some(job) = admitted {
                state.active_workers += 1;
                metrics::gauge!("verification_active_workers").set(state.active_workers as f64);
                metrics::gauge!("verification_queue_depth").set(state.pending.len() as f64);
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Record the outcome of a job and release its worker slot.
    fn finish(&self, job_id: Uuid, outcome: Result<VerificationResult, String>) {
        let Ok(mut state) = self.lock() else {
            tracing::error!(job_id = %job_id, "Job registry poisoned, dropping job outcome");
            return;
        };
        let now = Utc::now();

        match (state.jobs.get_mut(&job_id), outcome) {
            (Some(job), Ok(result)) => {
                if job.mark_completed(result, now) {
                    metrics::counter!("verification_jobs_completed").increment(1);
                    tracing::info!(job_id = %job_id, property_id = job.property_id, "Job completed");
                }
            }
            (Some(job), Err(error)) => {
                if job.mark_failed(error.clone(), now) {
                    metrics::counter!("verification_jobs_failed").increment(1);
                    tracing::error!(job_id = %job_id, property_id = job.property_id, error = %error, "Job failed");
                }
            }
            (None, _) => tracing::warn!(job_id = %job_id, "Finished job is no longer registered"),
        }

        state.active_workers = state.active_workers.saturating_sub(1);
        metrics::gauge!("verification_active_workers").set(state.active_workers as f64);
        drop(state);
        self.wakeup.notify_one();
    }

    fn evict_finished(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let mut state = self.lock()?;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| match (job.status.is_terminal(), job.completed_at) {
            (true, Some(done)) => now.signed_duration_since(done) < retention,
            _ => true,
        });
        let evicted = before - state.jobs.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished jobs");
        }
        Ok(evicted)
    }
}

async fn dispatch_loop(shared: Arc<Shared>, handler: Arc<dyn JobHandler>) {
    let mut sweep = tokio::time::interval(EVICTION_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        match shared.admit_next() {
            Ok(Some(job)) => {
                tokio::spawn(run_job(Arc::clone(&shared), Arc::clone(&handler), job));
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Job queue dispatcher cannot read registry");
                return;
            }
        }

        tokio::select! {
            _ = shared.wakeup.notified() => {}
            _ = sweep.tick() => {
                if let Err(e) = shared.evict_finished(Utc::now()) {
                    tracing::error!(error = %e, "Job eviction failed");
                }
            }
        }
    }
}

/// Run the handler on its own task so a panic is contained to this job.
async fn run_job(shared: Arc<Shared>, handler: Arc<dyn JobHandler>, job: VerificationJob) {
    let job_id = job.job_id;
    tracing::info!(job_id = %job_id, property_id = job.property_id, "Processing job");

    let outcome = match tokio::spawn(async move { handler.handle(job).await }).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(join_error) if join_error.is_panic() => Err("job handler panicked".to_string()),
        Err(join_error) => Err(format!("job handler was cancelled: {}", join_error)),
    };

    shared.finish(job_id, outcome);
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job registry lock poisoned")]
    Poisoned,
}
