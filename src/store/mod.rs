//! Storage for jobs and flashcard sets.
//!
//! Both live behind one [`Repository`] so that the duplicate check on
//! submission can see results and active jobs in the same atomic step.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::Settings;
use crate::error::{JottaError, Result};
use crate::flashcards::FlashcardSet;
use crate::queue::{Job, JobStatus, JobStore};
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence for flashcard sets keyed by `(subject_ref, owner_id)`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write a set as one document. Rewriting the same key replaces it.
    async fn save(&self, set: &FlashcardSet) -> Result<()>;

    async fn get(&self, subject_ref: &str, owner_id: &str) -> Result<Option<FlashcardSet>>;

    /// All sets for an owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FlashcardSet>>;

    /// Delete a set. Returns whether it existed.
    ///
    /// Fails with [`JottaError::Conflict`] while a job for the key is active,
    /// so a running job cannot recreate a set its owner just deleted.
    async fn delete(&self, subject_ref: &str, owner_id: &str) -> Result<bool>;
}

/// Jobs and results in one store.
pub trait Repository: JobStore + ResultStore {}

impl<T: JobStore + ResultStore> Repository for T {}

/// Both views of one repository.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub results: Arc<dyn ResultStore>,
}

impl Stores {
    pub fn new<S: Repository + 'static>(store: Arc<S>) -> Self {
        Self {
            jobs: store.clone(),
            results: store,
        }
    }
}

/// Open the configured store.
pub fn open(settings: &Settings) -> Result<Stores> {
    match settings.store.provider.as_str() {
        "sqlite" => Ok(Stores::new(Arc::new(SqliteStore::new(&settings.sqlite_path())?))),
        "memory" => Ok(Stores::new(Arc::new(MemoryStore::new()))),
        other => Err(JottaError::Config(format!("Unknown store provider: {}", other))),
    }
}

pub(crate) fn active_job_conflict(subject_ref: &str, owner_id: &str) -> JottaError {
    JottaError::Conflict(format!(
        "a job for {} (owner {}) is still running",
        subject_ref, owner_id
    ))
}

pub(crate) fn duplicate_key(subject_ref: &str, owner_id: &str) -> JottaError {
    JottaError::AlreadyExists(format!(
        "flashcards for {} (owner {}) already exist or are being generated",
        subject_ref, owner_id
    ))
}

/// Fail with `Conflict` unless `worker_id` holds the in-progress `job`.
pub(crate) fn check_holder(job: &Job, worker_id: &str) -> Result<()> {
    if job.status != JobStatus::InProgress {
        return Err(JottaError::Conflict(format!(
            "job {} is {}, not in_progress",
            job.id, job.status
        )));
    }
    match job.worker_id.as_deref() {
        Some(holder) if holder == worker_id => Ok(()),
        holder => Err(JottaError::Conflict(format!(
            "job {} is held by {}, not {}",
            job.id,
            holder.unwrap_or("nobody"),
            worker_id
        ))),
    }
}

pub(crate) fn lock_error<T>(e: std::sync::PoisonError<T>) -> JottaError {
    JottaError::Store(format!("Failed to acquire lock: {}", e))
}

/// Behaviour every store must share; run against each implementation.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::error::ErrorKind;
    use crate::flashcards::{assemble_flashcards, FlashcardSet};
    use crate::queue::{JobFailure, JobPayload};
    use chrono::{DateTime, Duration, Utc};

    const W: &str = "worker-1";

    fn lease() -> Duration {
        Duration::seconds(60)
    }

    async fn claim<S: Repository>(store: &S, now: DateTime<Utc>) -> Option<Job> {
        store.claim_next(W, now, lease()).await.unwrap()
    }

    fn set(subject_ref: &str, owner_id: &str) -> FlashcardSet {
        FlashcardSet::new(subject_ref, owner_id, "T", None, assemble_flashcards("Line1\nLine2"))
    }

    fn failure(attempt: u32) -> JobFailure {
        JobFailure {
            stage: Some("transcribe".into()),
            kind: ErrorKind::TransientExternal,
            message: "503".into(),
            attempt,
        }
    }

    pub async fn enqueue_rejects_duplicates<S: Repository>(store: &S) {
        store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();

        let err = store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, JottaError::AlreadyExists(_)));

        // other owner, same video
        store
            .enqueue(JobPayload::generate_flashcards("abc123", "u2"))
            .await
            .unwrap();

        store.save(&set("xyz789", "u1")).await.unwrap();
        let err = store
            .enqueue(JobPayload::generate_flashcards("xyz789", "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    pub async fn claims_oldest_available<S: Repository>(store: &S) {
        let first = store
            .enqueue(JobPayload::generate_flashcards("aaa", "u1"))
            .await
            .unwrap();
        let second = store
            .enqueue(JobPayload::generate_flashcards("bbb", "u1"))
            .await
            .unwrap();

        let claimed = claim(store, Utc::now()).await.unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::InProgress);
        assert_eq!(claimed.attempts, 1);

        let claimed = claim(store, Utc::now()).await.unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(claim(store, Utc::now()).await.is_none());
    }

    pub async fn retry_then_terminal_failure<S: Repository>(store: &S) {
        let job = store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();
        let now = Utc::now();

        let claimed = claim(store, now).await.unwrap();
        let retry_at = now + Duration::seconds(5);
        let after = store
            .fail(&claimed.id, W, failure(1), Some(retry_at))
            .await
            .unwrap();
        assert_eq!(after.status, JobStatus::Pending);
        assert_eq!(after.failure().map(|f| f.attempt), Some(1));

        // not claimable during backoff
        assert!(claim(store, now).await.is_none());
        let claimed = claim(store, retry_at).await.unwrap();
        assert_eq!(claimed.attempts, 2);

        let after = store.fail(&claimed.id, W, failure(2), None).await.unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert!(claim(store, retry_at + Duration::hours(1)).await.is_none());

        let snapshot = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 2);

        // terminal failure frees the key
        store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();
    }

    pub async fn complete_records_result<S: Repository>(store: &S) {
        let job = store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();
        let claimed = claim(store, Utc::now()).await.unwrap();

        let saved = set("abc123", "u1");
        store.save(&saved).await.unwrap();
        let done = store.complete(&claimed.id, W, saved.reference()).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.updated_at >= job.updated_at);

        let err = store.complete(&claimed.id, W, saved.reference()).await.unwrap_err();
        assert!(matches!(err, JottaError::Conflict(_)));

        let err = store.fail("missing", W, failure(1), None).await.unwrap_err();
        assert!(matches!(err, JottaError::NotFound(_)));
    }

    pub async fn release_refunds_attempt<S: Repository>(store: &S) {
        store
            .enqueue(JobPayload::generate_flashcards("aaa", "u1"))
            .await
            .unwrap();

        let a = claim(store, Utc::now()).await.unwrap();
        assert_eq!(a.worker_id.as_deref(), Some(W));
        let released = store.release(&a.id, W).await.unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert_eq!(released.attempts, 0);
        assert!(released.worker_id.is_none());
        assert!(released.lease_expires_at.is_none());

        let err = store.release(&a.id, W).await.unwrap_err();
        assert!(matches!(err, JottaError::Conflict(_)));

        let again = claim(store, Utc::now()).await.unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.attempts, 1);
    }

    /// `a` and `b` may be the same store or two handles on one database.
    pub async fn leases_guard_ownership<S: Repository>(a: &S, b: &S) {
        let job = a
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();
        let now = Utc::now();

        let held = a.claim_next("worker-a", now, lease()).await.unwrap().unwrap();
        assert_eq!(held.id, job.id);
        assert_eq!(held.attempts, 1);
        assert_eq!(held.worker_id.as_deref(), Some("worker-a"));

        // a live lease is not claimable
        let mid = now + Duration::seconds(30);
        assert!(b.claim_next("worker-b", mid, lease()).await.unwrap().is_none());

        // and only the holder may move the job on
        let saved = set("abc123", "u1");
        for err in [
            b.complete(&job.id, "worker-b", saved.reference()).await.unwrap_err(),
            b.fail(&job.id, "worker-b", failure(1), None).await.unwrap_err(),
            b.release(&job.id, "worker-b").await.unwrap_err(),
            b.extend_lease(&job.id, "worker-b", mid).await.unwrap_err(),
        ] {
            assert!(matches!(err, JottaError::Conflict(_)), "{:?}", err);
        }

        // renewing keeps the job past the original expiry
        a.extend_lease(&job.id, "worker-a", now + Duration::seconds(90))
            .await
            .unwrap();
        let past_first_lease = now + Duration::seconds(61);
        assert!(b
            .claim_next("worker-b", past_first_lease, lease())
            .await
            .unwrap()
            .is_none());

        // once it lapses another worker takes over on a new attempt
        let expired = now + Duration::seconds(91);
        let taken = b.claim_next("worker-b", expired, lease()).await.unwrap().unwrap();
        assert_eq!(taken.id, job.id);
        assert_eq!(taken.attempts, 2);
        assert_eq!(taken.worker_id.as_deref(), Some("worker-b"));

        // the previous holder can no longer touch it
        let err = a
            .complete(&job.id, "worker-a", saved.reference())
            .await
            .unwrap_err();
        assert!(matches!(err, JottaError::Conflict(_)));
        let err = a.extend_lease(&job.id, "worker-a", expired).await.unwrap_err();
        assert!(matches!(err, JottaError::Conflict(_)));

        let done = b.complete(&job.id, "worker-b", saved.reference()).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.worker_id.is_none());

        let seen_by_a = a.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(seen_by_a.status, JobStatus::Completed);
        assert_eq!(seen_by_a.attempts, 2);
    }

    pub async fn results_by_owner<S: Repository>(store: &S) {
        store.save(&set("aaa", "u1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save(&set("bbb", "u1")).await.unwrap();
        store.save(&set("ccc", "u2")).await.unwrap();

        let listed = store.list_by_owner("u1").await.unwrap();
        let refs: Vec<_> = listed.iter().map(|s| s.subject_ref.as_str()).collect();
        assert_eq!(refs, vec!["bbb", "aaa"]);

        let got = store.get("aaa", "u1").await.unwrap().unwrap();
        assert_eq!(got.flashcards.len(), 2);
        assert_eq!(got.flashcards[0].content, "Line1");
        assert!(store.get("aaa", "u2").await.unwrap().is_none());

        // saving the same key again replaces the set
        store.save(&set("aaa", "u1")).await.unwrap();
        assert_eq!(store.list_by_owner("u1").await.unwrap().len(), 2);

        assert!(store.delete("aaa", "u1").await.unwrap());
        assert!(!store.delete("aaa", "u1").await.unwrap());
        assert!(store.get("aaa", "u1").await.unwrap().is_none());
    }

    pub async fn delete_conflicts_with_active_job<S: Repository>(store: &S) {
        store.save(&set("abc123", "u1")).await.unwrap();
        store.delete("abc123", "u1").await.unwrap();
        store
            .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
            .await
            .unwrap();
        store.save(&set("abc123", "u1")).await.unwrap();

        let err = store.delete("abc123", "u1").await.unwrap_err();
        assert!(matches!(err, JottaError::Conflict(_)));
        assert!(store.get("abc123", "u1").await.unwrap().is_some());
    }
}
