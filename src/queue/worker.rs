//! Worker pool that claims queued jobs and runs them through the pipeline.
//!
//! Each worker runs one job to completion before claiming another. Running
//! jobs are tracked with a cancellation token each, children of the pool's
//! shutdown token, so both a single job and the whole pool can be stopped.
//!
//! Each worker claims under its own id and renews the lease while a job
//! runs. If renewal finds the job taken over, the run is stopped and its
//! outcome dropped. A panic inside a run is caught and recorded as a failed
//! attempt, so the worker keeps going.
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► claim_next (JobStore, leased to this pool)
//!     ├─► PipelineExecutor::run(job, token)  ◄── extend_lease every lease/3
//!     └─► complete | fail (retry or terminal) | release (shutdown)
//! ```

use super::{Job, JobEvent, JobFailure, JobStore, QueuePolicy};
use crate::config::QueueSettings;
use crate::error::{ErrorKind, JottaError, Result, StageError};
use crate::flashcards::FlashcardSet;
use crate::pipeline::PipelineExecutor;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// How long an idle worker waits before looking for work again.
    pub dispatch_interval: Duration,
    /// How long a claim holds a job without renewal.
    pub lease: Duration,
    pub policy: QueuePolicy,
}

impl WorkerConfig {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            dispatch_interval: Duration::from_millis(settings.dispatch_interval_ms),
            lease: Duration::from_secs(settings.lease_seconds.max(1)),
            policy: QueuePolicy::from_settings(settings),
        }
    }

    fn lease_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    fn renew_every(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(10))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

/// How a leased run ended.
enum RunOutcome {
    Finished(std::result::Result<FlashcardSet, StageError>),
    Panicked(String),
    /// Another worker holds the job now.
    LeaseLost,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Shared {
    /// Prefix of the worker ids this pool claims under.
    pool_id: String,
    jobs: Arc<dyn JobStore>,
    executor: Arc<PipelineExecutor>,
    config: WorkerConfig,
    events: broadcast::Sender<JobEvent>,
    /// Track running jobs for cancellation
    running: RwLock<HashMap<String, CancellationToken>>,
    wake: Notify,
}

impl Shared {
    fn emit(&self, event: JobEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Claim one job and drive it to its next state.
    async fn process_next(&self, worker_id: &str, shutdown: &CancellationToken) -> Result<Option<Job>> {
        let claimed = self
            .jobs
            .claim_next(worker_id, Utc::now(), self.config.lease_span())
            .await?;
        let Some(job) = claimed else {
            return Ok(None);
        };

        info!(job_id = %job.id, attempt = job.attempts, job_type = job.job_type(), "Claimed job");

        let max_attempts = self.config.policy.max_attempts;
        if job.attempts > max_attempts {
            // the last allowed attempt lost its lease
            let failure = JobFailure {
                stage: None,
                kind: ErrorKind::Internal,
                message: format!("attempt {} was abandoned and no attempts are left", max_attempts),
                attempt: max_attempts,
            };
            return self.record_failure(&job, worker_id, failure).await.map(Some);
        }

        self.emit(JobEvent::Started {
            job_id: job.id.clone(),
            attempt: job.attempts,
        });

        let token = shutdown.child_token();
        self.running.write().await.insert(job.id.clone(), token.clone());
        let outcome = self.run_leased(&job, worker_id, &token).await;
        self.running.write().await.remove(&job.id);

        let updated = match outcome {
            RunOutcome::LeaseLost => {
                warn!(job_id = %job.id, "Lease lost, leaving the job to its new holder");
                return self.jobs.get_job(&job.id).await;
            }
            RunOutcome::Panicked(msg) => {
                let failure = JobFailure {
                    stage: None,
                    kind: ErrorKind::Internal,
                    message: format!("pipeline panicked: {}", msg),
                    attempt: job.attempts,
                };
                self.record_failure(&job, worker_id, failure).await?
            }
            RunOutcome::Finished(Ok(set)) => {
                let reference = set.reference();
                let card_count = reference.card_count;
                match self.jobs.complete(&job.id, worker_id, reference).await {
                    Ok(done) => {
                        info!(job_id = %job.id, attempts = done.attempts, "Job completed");
                        self.emit(JobEvent::Completed {
                            job_id: job.id.clone(),
                            card_count,
                        });
                        done
                    }
                    Err(err) => {
                        // the set is saved; a retry rewrites it and completes again
                        error!(job_id = %job.id, error = %err, "Failed to mark job completed");
                        let failure = JobFailure::from_error(&err, job.attempts);
                        self.record_failure(&job, worker_id, failure).await?
                    }
                }
            }
            RunOutcome::Finished(Err(err))
                if err.kind() == ErrorKind::Cancelled && shutdown.is_cancelled() =>
            {
                let released = self.jobs.release(&job.id, worker_id).await?;
                info!(job_id = %job.id, "Job interrupted by shutdown, released");
                released
            }
            RunOutcome::Finished(Err(err)) => {
                let failure = JobFailure::from_stage_error(&err, job.attempts);
                self.record_failure(&job, worker_id, failure).await?
            }
        };

        Ok(Some(updated))
    }

    /// Run the pipeline while renewing the lease, catching panics.
    async fn run_leased(&self, job: &Job, worker_id: &str, token: &CancellationToken) -> RunOutcome {
        let run = AssertUnwindSafe(self.executor.run(job, token)).catch_unwind();
        tokio::pin!(run);

        let mut heartbeat = tokio::time::interval(self.config.renew_every());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick is immediate; the claim already set the lease
        heartbeat.tick().await;

        let mut lost = false;
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = heartbeat.tick(), if !lost => {
                    let until = Utc::now() + self.config.lease_span();
                    match self.jobs.extend_lease(&job.id, worker_id, until).await {
                        Ok(()) => debug!(job_id = %job.id, "Lease renewed"),
                        Err(e @ (JottaError::Conflict(_) | JottaError::NotFound(_))) => {
                            error!(job_id = %job.id, error = %e, "Lease lost, stopping job");
                            lost = true;
                            token.cancel();
                        }
                        // the lease may still be renewed on the next tick
                        Err(e) => warn!(job_id = %job.id, error = %e, "Failed to renew lease"),
                    }
                }
            }
        };

        if lost {
            return RunOutcome::LeaseLost;
        }
        match result {
            Ok(outcome) => RunOutcome::Finished(outcome),
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(job_id = %job.id, "Pipeline panicked: {}", msg);
                RunOutcome::Panicked(msg)
            }
        }
    }

    /// Record a failed attempt, scheduling a retry if the policy allows one.
    async fn record_failure(&self, job: &Job, worker_id: &str, failure: JobFailure) -> Result<Job> {
        let retry_at = self
            .config
            .policy
            .retry_at(failure.attempt, failure.kind, Utc::now());
        let updated = self
            .jobs
            .fail(&job.id, worker_id, failure.clone(), retry_at)
            .await?;
        let stage = failure.stage.as_deref().unwrap_or("-");

        match retry_at {
            Some(available_at) => {
                warn!(
                    job_id = %job.id,
                    stage,
                    attempt = failure.attempt,
                    max_attempts = self.config.policy.max_attempts,
                    "{}; retry scheduled",
                    failure.message
                );
                self.emit(JobEvent::RetryScheduled {
                    job_id: job.id.clone(),
                    attempt: failure.attempt,
                    available_at,
                    failure,
                });
            }
            None => {
                error!(job_id = %job.id, stage, attempt = failure.attempt, "{}; job failed", failure.message);
                self.emit(JobEvent::Failed {
                    job_id: job.id.clone(),
                    failure,
                });
            }
        }
        Ok(updated)
    }

    async fn worker_loop(self: Arc<Self>, index: usize, shutdown: CancellationToken) {
        let worker_id = format!("{}-{}", self.pool_id, index);
        debug!(worker = index, worker_id = %worker_id, "Worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let processed = AssertUnwindSafe(self.process_next(&worker_id, &shutdown))
                .catch_unwind()
                .await;
            let idle = match processed {
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => self.config.dispatch_interval,
                Ok(Err(e)) => {
                    // a job left in_progress is reclaimed once its lease runs out
                    error!(worker = index, error = %e, "Failed to process job");
                    Duration::from_secs(1)
                }
                Err(panic) => {
                    error!(worker = index, "Worker panicked: {}", panic_message(panic.as_ref()));
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        debug!(worker = index, "Worker stopped");
    }
}

/// A pool of workers draining the job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executor: Arc<PipelineExecutor>,
        config: WorkerConfig,
        events: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool_id: format!("pool-{}", Uuid::new_v4()),
                jobs,
                executor,
                config,
                events,
                running: RwLock::new(HashMap::new()),
                wake: Notify::new(),
            }),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers.
    ///
    /// Jobs left `in_progress` by a process that died are picked up by the
    /// ordinary claim once their lease has expired.
    pub fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().map_err(crate::store::lock_error)?;
        if !handles.is_empty() {
            warn!("Worker pool already started");
            return Ok(());
        }

        for index in 0..self.shared.config.workers {
            let shared = self.shared.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(shared.worker_loop(index, shutdown)));
        }

        info!(
            workers = self.shared.config.workers,
            pool_id = %self.shared.pool_id,
            "Worker pool started"
        );
        Ok(())
    }

    /// Claim and run a single job on the calling task.
    pub async fn run_next(&self) -> Result<Option<Job>> {
        let worker_id = format!("{}-inline", self.shared.pool_id);
        self.shared.process_next(&worker_id, &self.shutdown).await
    }

    /// Wake idle workers, e.g. after an enqueue.
    pub fn notify(&self) {
        self.shared.wake.notify_waiters();
    }

    /// Cancel a running job. Returns `false` if it is not running here.
    ///
    /// The job ends `failed` with a cancelled error and is not retried.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.shared.running.read().await.get(job_id) {
            Some(token) => {
                info!(job_id = %job_id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of the jobs currently running.
    pub async fn running_jobs(&self) -> Vec<String> {
        self.shared.running.read().await.keys().cloned().collect()
    }

    /// Stop all workers, interrupting running jobs.
    ///
    /// Interrupted jobs are released back to `pending` without using up an
    /// attempt.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(e) => {
                error!("Worker handles lock poisoned: {}", e);
                return;
            }
        };

        let running = self.shared.running.read().await.len();
        if running > 0 {
            info!(count = running, "Waiting for running jobs to stop");
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}
