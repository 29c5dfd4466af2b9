//! SQLite-backed job and result store.
//!
//! Jobs and flashcard sets share one database. Every queue transition runs in
//! an immediate transaction, and a partial unique index forbids two active
//! jobs for the same key even across processes sharing the file. A claimed
//! row records its worker and lease, so processes sharing the file never
//! hold the same job at once.

use super::{active_job_conflict, check_holder, duplicate_key, lock_error, ResultStore};
use crate::error::{JottaError, Result};
use crate::flashcards::{FlashcardSet, FlashcardSetRef};
use crate::queue::{Job, JobFailure, JobOutcome, JobPayload, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        job_type TEXT NOT NULL,
        subject_ref TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        status TEXT NOT NULL,
        result_json TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        available_at TEXT NOT NULL,
        worker_id TEXT,
        lease_expires_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs(status, available_at);

    CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_key
        ON jobs(subject_ref, owner_id)
        WHERE status IN ('pending', 'in_progress');

    CREATE TABLE IF NOT EXISTS flashcard_sets (
        subject_ref TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        thumbnail TEXT,
        flashcards_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (subject_ref, owner_id)
    );

    CREATE INDEX IF NOT EXISTS idx_sets_owner ON flashcard_sets(owner_id, created_at);
"#;

const JOB_COLUMNS: &str = "id, payload_json, status, result_json, attempts, created_at, \
     updated_at, available_at, worker_id, lease_expires_at";

/// SQLite job and result store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Fixed-width UTC timestamps so text comparison orders them correctly.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| JottaError::Store(format!("Invalid timestamp '{}': {}", s, e)))
}

struct JobRow {
    id: String,
    payload_json: String,
    status: String,
    result_json: Option<String>,
    attempts: u32,
    created_at: String,
    updated_at: String,
    available_at: String,
    worker_id: Option<String>,
    lease_expires_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload_json: row.get(1)?,
            status: row.get(2)?,
            result_json: row.get(3)?,
            attempts: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            available_at: row.get(7)?,
            worker_id: row.get(8)?,
            lease_expires_at: row.get(9)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            payload: serde_json::from_str(&self.payload_json)?,
            status: self.status.parse()?,
            result: self
                .result_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            attempts: self.attempts,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            available_at: parse_ts(&self.available_at)?,
            worker_id: self.worker_id,
            lease_expires_at: self.lease_expires_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn load_job(tx: &Transaction<'_>, id: &str) -> Result<Option<Job>> {
    tx.query_row(
        &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
        params![id],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_job)
    .transpose()
}

/// Load a job that `worker_id` must currently hold.
fn load_held(tx: &Transaction<'_>, id: &str, worker_id: &str) -> Result<Job> {
    let job = load_job(tx, id)?.ok_or_else(|| JottaError::NotFound(format!("job {}", id)))?;
    check_holder(&job, worker_id)?;
    Ok(job)
}

fn key_is_taken(tx: &Transaction<'_>, subject_ref: &str, owner_id: &str) -> Result<bool> {
    let taken = tx.query_row(
        r#"
        SELECT EXISTS(SELECT 1 FROM flashcard_sets WHERE subject_ref = ?1 AND owner_id = ?2)
            OR EXISTS(SELECT 1 FROM jobs WHERE subject_ref = ?1 AND owner_id = ?2
                      AND status IN ('pending', 'in_progress'))
        "#,
        params![subject_ref, owner_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, payload), fields(subject_ref = payload.subject_ref(), owner_id = payload.owner_id()))]
    async fn enqueue(&self, payload: JobPayload) -> Result<Job> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if key_is_taken(&tx, payload.subject_ref(), payload.owner_id())? {
            return Err(duplicate_key(payload.subject_ref(), payload.owner_id()));
        }

        let job = Job::new(payload);
        let inserted = tx.execute(
            r#"
            INSERT INTO jobs
            (id, job_type, subject_ref, owner_id, payload_json, status, result_json,
             attempts, created_at, updated_at, available_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, ?7, ?7, ?7)
            "#,
            params![
                job.id,
                job.job_type(),
                job.payload.subject_ref(),
                job.payload.owner_id(),
                serde_json::to_string(&job.payload)?,
                job.status.as_str(),
                ts(job.created_at),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(duplicate_key(job.payload.subject_ref(), job.payload.owner_id()));
            }
            Err(e) => return Err(e.into()),
        }

        let stored = load_job(&tx, &job.id)?
            .ok_or_else(|| JottaError::Store(format!("job {} vanished after insert", job.id)))?;
        tx.commit()?;

        debug!("Enqueued job {}", stored.id);
        Ok(stored)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<Job>> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<(String, Option<String>)> = tx
            .query_row(
                r#"
                SELECT id, CASE WHEN status = 'in_progress' THEN worker_id END FROM jobs
                WHERE (status = 'pending' AND available_at <= ?1)
                   OR (status = 'in_progress' AND lease_expires_at < ?1)
                ORDER BY seq
                LIMIT 1
                "#,
                params![ts(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, previous_holder)) = candidate else {
            return Ok(None);
        };
        if let Some(previous) = previous_holder {
            warn!(job_id = %id, previous_worker = %previous, "Reclaiming job with expired lease");
        }

        tx.execute(
            r#"
            UPDATE jobs SET status = 'in_progress', attempts = attempts + 1, updated_at = ?2,
                worker_id = ?3, lease_expires_at = ?4
            WHERE id = ?1
            "#,
            params![id, ts(Utc::now()), worker_id, ts(now + lease)],
        )?;
        let job = load_job(&tx, &id)?;
        tx.commit()?;

        Ok(job)
    }

    async fn extend_lease(&self, id: &str, worker_id: &str, until: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        load_held(&tx, id, worker_id)?;
        tx.execute(
            "UPDATE jobs SET lease_expires_at = ?3 WHERE id = ?1 AND worker_id = ?2",
            params![id, worker_id, ts(until)],
        )?;
        tx.commit()?;

        Ok(())
    }

    async fn complete(&self, id: &str, worker_id: &str, result: FlashcardSetRef) -> Result<Job> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        load_held(&tx, id, worker_id)?;
        let outcome = JobOutcome::Completed(result);
        tx.execute(
            r#"
            UPDATE jobs SET status = 'completed', result_json = ?3, updated_at = ?4,
                worker_id = NULL, lease_expires_at = NULL
            WHERE id = ?1 AND worker_id = ?2
            "#,
            params![id, worker_id, serde_json::to_string(&outcome)?, ts(Utc::now())],
        )?;
        let job = reload_job(&tx, id)?;
        tx.commit()?;

        Ok(job)
    }

    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        failure: JobFailure,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job = load_held(&tx, id, worker_id)?;
        let outcome = serde_json::to_string(&JobOutcome::Failed(failure))?;
        let now = Utc::now();

        match retry_at {
            Some(at) => tx.execute(
                r#"
                UPDATE jobs SET status = 'pending', result_json = ?3, updated_at = ?4, available_at = ?5,
                    worker_id = NULL, lease_expires_at = NULL
                WHERE id = ?1 AND worker_id = ?2
                "#,
                params![id, worker_id, outcome, ts(now), ts(at)],
            )?,
            None => tx.execute(
                r#"
                UPDATE jobs SET status = 'failed', result_json = ?3, updated_at = ?4,
                    worker_id = NULL, lease_expires_at = NULL
                WHERE id = ?1 AND worker_id = ?2
                "#,
                params![id, worker_id, outcome, ts(now)],
            )?,
        };
        let updated = reload_job(&tx, &job.id)?;
        tx.commit()?;

        Ok(updated)
    }

    async fn release(&self, id: &str, worker_id: &str) -> Result<Job> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        load_held(&tx, id, worker_id)?;
        let now = ts(Utc::now());
        tx.execute(
            r#"
            UPDATE jobs SET status = 'pending', attempts = MAX(attempts - 1, 0),
                updated_at = ?3, available_at = ?3, worker_id = NULL, lease_expires_at = NULL
            WHERE id = ?1 AND worker_id = ?2
            "#,
            params![id, worker_id, now],
        )?;
        let job = reload_job(&tx, id)?;
        tx.commit()?;

        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
            JobRow::from_row,
        )
        .optional()?
        .map(JobRow::into_job)
        .transpose()
    }

    async fn active_job(&self, subject_ref: &str, owner_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.query_row(
            &format!(
                r#"
                SELECT {} FROM jobs
                WHERE subject_ref = ?1 AND owner_id = ?2 AND status IN ('pending', 'in_progress')
                "#,
                JOB_COLUMNS
            ),
            params![subject_ref, owner_id],
            JobRow::from_row,
        )
        .optional()?
        .map(JobRow::into_job)
        .transpose()
    }
}

/// Re-read a job after a transition inside the same transaction.
fn reload_job(tx: &Transaction<'_>, id: &str) -> Result<Job> {
    load_job(tx, id)?.ok_or_else(|| JottaError::NotFound(format!("job {}", id)))
}

fn row_to_set(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_set(
    (subject_ref, owner_id, title, thumbnail, flashcards_json, created_at): (
        String,
        String,
        String,
        Option<String>,
        String,
        String,
    ),
) -> Result<FlashcardSet> {
    Ok(FlashcardSet {
        subject_ref,
        owner_id,
        title,
        thumbnail,
        flashcards: serde_json::from_str(&flashcards_json)?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl ResultStore for SqliteStore {
    #[instrument(skip(self, set), fields(subject_ref = %set.subject_ref, owner_id = %set.owner_id))]
    async fn save(&self, set: &FlashcardSet) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO flashcard_sets
            (subject_ref, owner_id, title, thumbnail, flashcards_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                set.subject_ref,
                set.owner_id,
                set.title,
                set.thumbnail,
                serde_json::to_string(&set.flashcards)?,
                ts(set.created_at),
            ],
        )?;

        debug!("Saved {} flashcards", set.flashcards.len());
        Ok(())
    }

    async fn get(&self, subject_ref: &str, owner_id: &str) -> Result<Option<FlashcardSet>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        conn.query_row(
            r#"
            SELECT subject_ref, owner_id, title, thumbnail, flashcards_json, created_at
            FROM flashcard_sets WHERE subject_ref = ?1 AND owner_id = ?2
            "#,
            params![subject_ref, owner_id],
            row_to_set,
        )
        .optional()?
        .map(into_set)
        .transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FlashcardSet>> {
        let conn = self.conn.lock().map_err(lock_error)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT subject_ref, owner_id, title, thumbnail, flashcards_json, created_at
            FROM flashcard_sets WHERE owner_id = ?1
            ORDER BY created_at DESC
            "#,
        )?;

        let rows = stmt
            .query_map(params![owner_id], row_to_set)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(into_set).collect()
    }

    async fn delete(&self, subject_ref: &str, owner_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: bool = tx.query_row(
            r#"
            SELECT EXISTS(SELECT 1 FROM jobs WHERE subject_ref = ?1 AND owner_id = ?2
                          AND status IN ('pending', 'in_progress'))
            "#,
            params![subject_ref, owner_id],
            |row| row.get(0),
        )?;
        if active {
            return Err(active_job_conflict(subject_ref, owner_id));
        }

        let deleted = tx.execute(
            "DELETE FROM flashcard_sets WHERE subject_ref = ?1 AND owner_id = ?2",
            params![subject_ref, owner_id],
        )?;
        tx.commit()?;

        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobStatus;
    use crate::store::contract;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_enqueue_rejects_duplicates() {
        contract::enqueue_rejects_duplicates(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_claims_oldest_available() {
        contract::claims_oldest_available(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_retry_then_terminal_failure() {
        contract::retry_then_terminal_failure(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_complete_records_result() {
        contract::complete_records_result(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_release_refunds_attempt() {
        contract::release_refunds_attempt(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_leases_guard_ownership() {
        let store = SqliteStore::in_memory().unwrap();
        contract::leases_guard_ownership(&store, &store).await;
    }

    #[tokio::test]
    async fn test_leases_hold_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jotta.db");
        let a = SqliteStore::new(&path).unwrap();
        let b = SqliteStore::new(&path).unwrap();
        contract::leases_guard_ownership(&a, &b).await;
    }

    #[tokio::test]
    async fn test_results_by_owner() {
        contract::results_by_owner(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_conflicts_with_active_job() {
        contract::delete_conflicts_with_active_job(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_jobs_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("jotta.db");
        let lease = chrono::Duration::seconds(60);
        let claimed_at = Utc::now();

        let id = {
            let store = SqliteStore::new(&path).unwrap();
            let job = store
                .enqueue(JobPayload::generate_flashcards("abc123", "u1"))
                .await
                .unwrap();
            store.claim_next("crashed", claimed_at, lease).await.unwrap();
            job.id
        };

        let store = SqliteStore::new(&path).unwrap();
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.worker_id.as_deref(), Some("crashed"));
        assert_eq!(job.lease_expires_at.map(ts), Some(ts(claimed_at + lease)));

        // held until the lease runs out
        assert!(store.claim_next("w2", claimed_at, lease).await.unwrap().is_none());

        let later = claimed_at + lease + chrono::Duration::seconds(1);
        let job = store.claim_next("w2", later, lease).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.worker_id.as_deref(), Some("w2"));
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = DateTime::parse_from_rfc3339("2026-01-01T09:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(ts(early) < ts(late));
        assert_eq!(parse_ts(&ts(late)).unwrap(), late);
    }
}
