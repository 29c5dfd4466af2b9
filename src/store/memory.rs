//! In-memory job and result store.
//!
//! Not durable. Used for tests and for `store.provider = "memory"`.

use super::{active_job_conflict, check_holder, duplicate_key, lock_error, ResultStore};
use crate::error::{JottaError, Result};
use crate::flashcards::{FlashcardSet, FlashcardSetRef};
use crate::queue::{Job, JobFailure, JobOutcome, JobPayload, JobStatus, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    /// Insertion order is dispatch order.
    jobs: Vec<Job>,
    sets: HashMap<(String, String), FlashcardSet>,
}

impl State {
    fn has_active_job(&self, subject_ref: &str, owner_id: &str) -> bool {
        self.jobs.iter().any(|j| {
            j.status.is_active()
                && j.payload.subject_ref() == subject_ref
                && j.payload.owner_id() == owner_id
        })
    }

    fn held_mut(&mut self, id: &str, worker_id: &str) -> Result<&mut Job> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| JottaError::NotFound(format!("job {}", id)))?;
        check_holder(job, worker_id)?;
        Ok(job)
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(subject_ref: &str, owner_id: &str) -> (String, String) {
    (subject_ref.to_string(), owner_id.to_string())
}

fn unlease(job: &mut Job) {
    job.worker_id = None;
    job.lease_expires_at = None;
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, payload: JobPayload) -> Result<Job> {
        let mut state = self.state.lock().map_err(lock_error)?;
        let (subject_ref, owner_id) = (payload.subject_ref(), payload.owner_id());

        if state.sets.contains_key(&key(subject_ref, owner_id))
            || state.has_active_job(subject_ref, owner_id)
        {
            return Err(duplicate_key(subject_ref, owner_id));
        }

        let job = Job::new(payload);
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().map_err(lock_error)?;
        let next = state.jobs.iter_mut().find(|j| match j.status {
            JobStatus::Pending => j.available_at <= now,
            JobStatus::InProgress => j.lease_expires_at.is_some_and(|until| until < now),
            _ => false,
        });

        Ok(next.map(|job| {
            job.status = JobStatus::InProgress;
            job.attempts += 1;
            job.updated_at = Utc::now();
            job.worker_id = Some(worker_id.to_string());
            job.lease_expires_at = Some(now + lease);
            job.clone()
        }))
    }

    async fn extend_lease(&self, id: &str, worker_id: &str, until: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().map_err(lock_error)?;
        state.held_mut(id, worker_id)?.lease_expires_at = Some(until);
        Ok(())
    }

    async fn complete(&self, id: &str, worker_id: &str, result: FlashcardSetRef) -> Result<Job> {
        let mut state = self.state.lock().map_err(lock_error)?;
        let job = state.held_mut(id, worker_id)?;
        job.status = JobStatus::Completed;
        job.result = Some(JobOutcome::Completed(result));
        job.updated_at = Utc::now();
        unlease(job);
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: &str,
        worker_id: &str,
        failure: JobFailure,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let mut state = self.state.lock().map_err(lock_error)?;
        let job = state.held_mut(id, worker_id)?;
        job.result = Some(JobOutcome::Failed(failure));
        job.updated_at = Utc::now();
        match retry_at {
            Some(at) => {
                job.status = JobStatus::Pending;
                job.available_at = at;
            }
            None => job.status = JobStatus::Failed,
        }
        unlease(job);
        Ok(job.clone())
    }

    async fn release(&self, id: &str, worker_id: &str) -> Result<Job> {
        let mut state = self.state.lock().map_err(lock_error)?;
        let job = state.held_mut(id, worker_id)?;
        let now = Utc::now();
        job.status = JobStatus::Pending;
        job.attempts = job.attempts.saturating_sub(1);
        job.updated_at = now;
        job.available_at = now;
        unlease(job);
        Ok(job.clone())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let state = self.state.lock().map_err(lock_error)?;
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn active_job(&self, subject_ref: &str, owner_id: &str) -> Result<Option<Job>> {
        let state = self.state.lock().map_err(lock_error)?;
        Ok(state
            .jobs
            .iter()
            .find(|j| {
                j.status.is_active()
                    && j.payload.subject_ref() == subject_ref
                    && j.payload.owner_id() == owner_id
            })
            .cloned())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save(&self, set: &FlashcardSet) -> Result<()> {
        let mut state = self.state.lock().map_err(lock_error)?;
        state
            .sets
            .insert(key(&set.subject_ref, &set.owner_id), set.clone());
        Ok(())
    }

    async fn get(&self, subject_ref: &str, owner_id: &str) -> Result<Option<FlashcardSet>> {
        let state = self.state.lock().map_err(lock_error)?;
        Ok(state.sets.get(&key(subject_ref, owner_id)).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FlashcardSet>> {
        let state = self.state.lock().map_err(lock_error)?;
        let mut sets: Vec<FlashcardSet> = state
            .sets
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        sets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sets)
    }

    async fn delete(&self, subject_ref: &str, owner_id: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(lock_error)?;
        if state.has_active_job(subject_ref, owner_id) {
            return Err(active_job_conflict(subject_ref, owner_id));
        }
        Ok(state.sets.remove(&key(subject_ref, owner_id)).is_some())
    }
}
