//! Service object for Jotta.
//!
//! Wires settings, storage, the pipeline and the worker pool together and
//! exposes the submission and query surface used by the CLI and HTTP API.
//! Nothing here is global: every caller builds its own orchestrator and
//! owns its lifecycle.

use crate::audio::{FfmpegCompressor, YtDlpAcquirer};
use crate::config::{Prompts, Settings};
use crate::error::{JottaError, Result};
use crate::flashcards::FlashcardSet;
use crate::metadata::{parse_subject_ref, OEmbedLookup};
use crate::pipeline::{Adapters, PipelineConfig, PipelineExecutor};
use crate::queue::{Job, JobEvent, JobPayload, WorkerConfig, WorkerPool};
use crate::store::{self, Stores};
use crate::summarization::create_summarizer;
use crate::transcription::AssemblyAiTranscriber;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

const EVENT_BUFFER: usize = 256;

/// The main service object.
pub struct Orchestrator {
    settings: Settings,
    stores: Stores,
    events: broadcast::Sender<JobEvent>,
    workers: Option<WorkerPool>,
}

impl Orchestrator {
    /// Open storage only. Enough for submitting and querying; jobs are run
    /// by whichever process owns a worker pool.
    pub fn new(settings: Settings) -> Result<Self> {
        let stores = store::open(&settings)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            settings,
            stores,
            events,
            workers: None,
        })
    }

    /// Open storage and build the full pipeline with the configured adapters.
    pub fn with_workers(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let adapters = Adapters {
            metadata: Arc::new(OEmbedLookup::new(&settings.metadata)?),
            acquirer: Arc::new(YtDlpAcquirer::new(&settings.acquisition)),
            compressor: Arc::new(FfmpegCompressor::new()),
            transcriber: Arc::new(AssemblyAiTranscriber::new(&settings.transcription)?),
            summarizer: create_summarizer(&settings.summarization, prompts)?,
        };
        info!(
            "Using {} summarization ({})",
            settings.summarization.provider, settings.summarization.model
        );

        let stores = store::open(&settings)?;
        Self::with_components(settings, stores, adapters)
    }

    /// Build from explicit components.
    pub fn with_components(settings: Settings, stores: Stores, adapters: Adapters) -> Result<Self> {
        let work_dir = settings.temp_dir();
        std::fs::create_dir_all(&work_dir)?;

        let executor = Arc::new(PipelineExecutor::new(
            adapters,
            stores.results.clone(),
            PipelineConfig::from_settings(&settings),
            work_dir,
        ));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let workers = WorkerPool::new(
            stores.jobs.clone(),
            executor,
            WorkerConfig::from_settings(&settings.queue),
            events.clone(),
        );

        Ok(Self {
            settings,
            stores,
            events,
            workers: Some(workers),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Validate and enqueue a flashcard generation request.
    ///
    /// `input` may be a video URL or a bare id. Fails with
    /// [`JottaError::AlreadyExists`] if flashcards exist or are being
    /// generated for the same video and owner.
    #[instrument(skip(self), fields(input = %input, owner_id = %owner_id))]
    pub async fn submit(&self, input: &str, owner_id: &str) -> Result<Job> {
        let owner_id = validate_owner(owner_id)?;
        let subject_ref = parse_subject_ref(input)?;

        let job = self
            .stores
            .jobs
            .enqueue(JobPayload::generate_flashcards(&subject_ref, owner_id))
            .await?;
        info!(job_id = %job.id, subject_ref = %subject_ref, "Job enqueued");

        let _ = self.events.send(JobEvent::Enqueued {
            job_id: job.id.clone(),
            subject_ref,
            owner_id: owner_id.to_string(),
        });
        if let Some(workers) = &self.workers {
            workers.notify();
        }

        Ok(job)
    }

    /// Snapshot of a job.
    pub async fn job_status(&self, job_id: &str) -> Result<Job> {
        self.stores
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| JottaError::NotFound(format!("job {}", job_id)))
    }

    /// The active job for a video and owner, if one is queued or running.
    pub async fn active_job(&self, input: &str, owner_id: &str) -> Result<Option<Job>> {
        let subject_ref = parse_subject_ref(input)?;
        self.stores.jobs.active_job(&subject_ref, owner_id).await
    }

    pub async fn get_result(&self, input: &str, owner_id: &str) -> Result<FlashcardSet> {
        let subject_ref = parse_subject_ref(input)?;
        self.stores
            .results
            .get(&subject_ref, owner_id)
            .await?
            .ok_or_else(|| JottaError::NotFound(format!("flashcards for {}", subject_ref)))
    }

    /// All flashcard sets of an owner, newest first.
    pub async fn list_results(&self, owner_id: &str) -> Result<Vec<FlashcardSet>> {
        let owner_id = validate_owner(owner_id)?;
        self.stores.results.list_by_owner(owner_id).await
    }

    /// Delete a flashcard set.
    ///
    /// Rejected with [`JottaError::Conflict`] while a job for the same key
    /// is pending or running.
    #[instrument(skip(self))]
    pub async fn delete_result(&self, input: &str, owner_id: &str) -> Result<()> {
        let subject_ref = parse_subject_ref(input)?;
        if self.stores.results.delete(&subject_ref, owner_id).await? {
            info!(subject_ref = %subject_ref, "Deleted flashcards");
            Ok(())
        } else {
            Err(JottaError::NotFound(format!("flashcards for {}", subject_ref)))
        }
    }

    /// Cancel a job running in this process's worker pool.
    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let job = self.job_status(job_id).await?;
        let cancelled = match &self.workers {
            Some(workers) => workers.cancel(&job.id).await,
            None => false,
        };
        if cancelled {
            Ok(())
        } else {
            Err(JottaError::Conflict(format!(
                "job {} is {} and not running in this process",
                job.id, job.status
            )))
        }
    }

    /// Subscribe to job lifecycle events from this process.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Start the worker pool.
    pub fn start_workers(&self) -> Result<()> {
        match &self.workers {
            Some(workers) => workers.start(),
            None => Err(JottaError::Config(
                "orchestrator was built without a pipeline".to_string(),
            )),
        }
    }

    /// Stop the worker pool, if any, releasing running jobs.
    pub async fn shutdown(&self) {
        if let Some(workers) = &self.workers {
            workers.shutdown().await;
        }
    }
}

fn validate_owner(owner_id: &str) -> Result<&str> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(JottaError::InvalidInput("owner id is required".to_string()));
    }
    Ok(owner_id)
}
