//! Durable job queue for flashcard generation.
//!
//! A job moves through `pending -> in_progress -> completed | failed`, with
//! `in_progress -> pending` only when a failed attempt is scheduled for retry
//! or an interrupted attempt is released. Persistence lives behind
//! [`JobStore`]; the [`WorkerPool`] claims jobs and drives them through the
//! pipeline.
//!
//! A claim hands the job to one worker under a lease. The holder renews the
//! lease while the job runs, and only the holder may move the job on. A job
//! whose lease runs out (crashed or stuck process) becomes claimable again.
//!
//! An attempt is counted when a job is claimed. An attempt released at pool
//! shutdown is handed back uncounted. One lost to an expired lease stays
//! counted, so a job that keeps killing its worker still runs out of attempts.

mod worker;

pub use worker::{WorkerConfig, WorkerPool};

use crate::error::{ErrorKind, JottaError, Result, StageError};
use crate::flashcards::FlashcardSetRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::QueueSettings;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Pending and in-progress jobs block new submissions for their key.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JottaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JottaError::Store(format!("unknown job status '{}'", other))),
        }
    }
}

/// What a job asks the workers to do. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateFlashcards { subject_ref: String, owner_id: String },
}

impl JobPayload {
    pub fn generate_flashcards(subject_ref: impl Into<String>, owner_id: impl Into<String>) -> Self {
        JobPayload::GenerateFlashcards {
            subject_ref: subject_ref.into(),
            owner_id: owner_id.into(),
        }
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::GenerateFlashcards { .. } => "generate_flashcards",
        }
    }

    pub fn subject_ref(&self) -> &str {
        match self {
            JobPayload::GenerateFlashcards { subject_ref, .. } => subject_ref,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            JobPayload::GenerateFlashcards { owner_id, .. } => owner_id,
        }
    }
}

/// Structured record of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Stage that failed, if the failure came from a stage.
    pub stage: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    /// Attempt number the failure happened on.
    pub attempt: u32,
}

impl JobFailure {
    pub fn from_stage_error(err: &StageError, attempt: u32) -> Self {
        Self {
            stage: Some(err.stage.to_string()),
            kind: err.kind(),
            message: err.source.to_string(),
            attempt,
        }
    }

    pub fn from_error(err: &JottaError, attempt: u32) -> Self {
        Self {
            stage: None,
            kind: err.kind(),
            message: err.to_string(),
            attempt,
        }
    }
}

/// Terminal result attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(FlashcardSetRef),
    Failed(JobFailure),
}

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub result: Option<JobOutcome>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed. Pushed forward on retry.
    pub available_at: DateTime<Utc>,
    /// Worker holding the job while it is `in_progress`.
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A new pending job, claimable immediately.
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            status: JobStatus::Pending,
            result: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            available_at: now,
            worker_id: None,
            lease_expires_at: None,
        }
    }

    pub fn job_type(&self) -> &'static str {
        self.payload.job_type()
    }

    /// The last recorded failure, on a failed job or one awaiting retry.
    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.result {
            Some(JobOutcome::Failed(f)) => Some(f),
            _ => None,
        }
    }
}

/// Retry policy: attempt cap and fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl QueuePolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: Duration::from_secs(settings.backoff_seconds),
        }
    }

    /// When a job that just failed on attempt `attempts` should run again.
    ///
    /// `None` means the failure is terminal.
    pub fn retry_at(&self, attempts: u32, kind: ErrorKind, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !kind.is_retryable() || attempts >= self.max_attempts {
            return None;
        }
        let backoff = chrono::Duration::from_std(self.backoff).unwrap_or(chrono::Duration::zero());
        Some(now + backoff)
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

/// Lifecycle notifications published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued {
        job_id: String,
        subject_ref: String,
        owner_id: String,
    },
    Started {
        job_id: String,
        attempt: u32,
    },
    Completed {
        job_id: String,
        card_count: usize,
    },
    RetryScheduled {
        job_id: String,
        attempt: u32,
        available_at: DateTime<Utc>,
        failure: JobFailure,
    },
    Failed {
        job_id: String,
        failure: JobFailure,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Enqueued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }
}

/// Persistence for jobs.
///
/// Every transition is a single atomic write. Transitions out of
/// `in_progress` name the claiming worker and fail with
/// [`JottaError::Conflict`] unless that worker still holds the job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a pending job.
    ///
    /// Fails with [`JottaError::AlreadyExists`] if a flashcard set or an
    /// active job already exists for the payload's key. The check and the
    /// insert happen atomically.
    async fn enqueue(&self, payload: JobPayload) -> Result<Job>;

    /// Claim the oldest job available at `now` for `worker_id`.
    ///
    /// Candidates are pending jobs past their `available_at` and
    /// `in_progress` jobs whose lease expired before `now`. The job moves to
    /// `in_progress` under a lease ending at `now + lease`, and the attempt
    /// is counted.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<Job>>;

    /// Push the holder's lease out to `until`.
    async fn extend_lease(&self, id: &str, worker_id: &str, until: DateTime<Utc>) -> Result<()>;

    /// `in_progress -> completed`, recording the result reference.
    async fn complete(&self, id: &str, worker_id: &str, result: FlashcardSetRef) -> Result<Job>;

    /// Record a failed attempt.
    ///
    /// With `retry_at` the job returns to `pending`, claimable from that
    /// time. Without it the job becomes `failed`.
    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        failure: JobFailure,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job>;

    /// Hand an interrupted attempt back: `in_progress -> pending` without
    /// counting it.
    async fn release(&self, id: &str, worker_id: &str) -> Result<Job>;

    /// Read-only snapshot.
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// The active job for a key, if any.
    async fn active_job(&self, subject_ref: &str, owner_id: &str) -> Result<Option<Job>>;
}
