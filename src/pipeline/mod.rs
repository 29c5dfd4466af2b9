//! Flashcard generation pipeline.
//!
//! [`PipelineExecutor::run`] takes one claimed job through the stages in
//! order:
//!
//! ```text
//! MetadataFetch -> AudioAcquire -> AudioCompress -> Transcribe
//!     -> Summarize -> Assemble -> Persist -> Cleanup
//! ```
//!
//! Every run starts at the first stage; nothing carries over between
//! attempts. Audio lives in a per-attempt [`AudioWorkspace`] that is removed
//! before `run` returns, whatever the outcome. Failures come back as a
//! [`StageError`] naming the stage; retry decisions belong to the queue.

mod workspace;

pub use workspace::AudioWorkspace;

use crate::audio::{AudioCompressor, MediaAcquire};
use crate::chunking::chunk_text;
use crate::config::Settings;
use crate::error::{JottaError, Result, StageError};
use crate::flashcards::{assemble_flashcards, FlashcardSet};
use crate::metadata::MetadataLookup;
use crate::queue::{Job, JobPayload};
use crate::store::ResultStore;
use crate::summarization::Summarizer;
use crate::transcription::{wait_for_transcript, PollPolicy, TranscriptionService};
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MetadataFetch,
    AudioAcquire,
    AudioCompress,
    Transcribe,
    Summarize,
    Assemble,
    Persist,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::MetadataFetch => "metadata_fetch",
            Stage::AudioAcquire => "audio_acquire",
            Stage::AudioCompress => "audio_compress",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::Assemble => "assemble",
            Stage::Persist => "persist",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tunables for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Transcript chunk size in characters.
    pub chunk_size: usize,
    pub audio_bitrate_kbps: u32,
    /// Ceiling for every stage except Transcribe, which is bounded by `poll`.
    pub stage_timeout: Duration,
    pub poll: PollPolicy,
    /// Chunks summarized at once. Output order is kept regardless.
    pub summarize_concurrency: usize,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chunk_size: settings.pipeline.chunk_size,
            audio_bitrate_kbps: settings.pipeline.audio_bitrate_kbps,
            stage_timeout: settings.stage_timeout(),
            poll: PollPolicy::from_settings(&settings.transcription),
            summarize_concurrency: settings.pipeline.summarize_concurrency.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// The external capabilities a pipeline run needs.
#[derive(Clone)]
pub struct Adapters {
    pub metadata: Arc<dyn MetadataLookup>,
    pub acquirer: Arc<dyn MediaAcquire>,
    pub compressor: Arc<dyn AudioCompressor>,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Runs the stage sequence for one job.
pub struct PipelineExecutor {
    adapters: Adapters,
    results: Arc<dyn ResultStore>,
    config: PipelineConfig,
    work_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(
        adapters: Adapters,
        results: Arc<dyn ResultStore>,
        config: PipelineConfig,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            adapters,
            results,
            config,
            work_dir,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run every stage for `job`, persisting the flashcard set on success.
    ///
    /// `cancel` interrupts the run at the next suspension point; the remote
    /// transcript, if any, is cancelled too.
    #[instrument(skip(self, job, cancel), fields(job_id = %job.id, attempt = job.attempts))]
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> std::result::Result<FlashcardSet, StageError> {
        let JobPayload::GenerateFlashcards {
            subject_ref,
            owner_id,
        } = &job.payload;

        let metadata = self
            .stage(Stage::MetadataFetch, job, cancel, self.adapters.metadata.lookup(subject_ref))
            .await?;
        info!(job_id = %job.id, "Title: {}", metadata.title);

        let workspace = AudioWorkspace::create(&self.work_dir, &job.id, job.attempts)
            .await
            .map_err(|e| StageError::new(Stage::AudioAcquire, &job.id, e))?;

        let transcript = self.audio_to_text(job, subject_ref, &workspace, cancel).await;

        if let Err(e) = workspace.cleanup().await {
            warn!(job_id = %job.id, stage = %Stage::Cleanup, "Failed to remove audio: {}", e);
        }
        let transcript = transcript?;

        let summary = self
            .stage(Stage::Summarize, job, cancel, self.summarize(&transcript))
            .await?;

        let flashcards = self
            .stage(Stage::Assemble, job, cancel, async {
                let cards = assemble_flashcards(&summary);
                if cards.is_empty() {
                    return Err(JottaError::Summarization(
                        "summary produced no flashcards".to_string(),
                    ));
                }
                Ok(cards)
            })
            .await?;

        let set = FlashcardSet::new(
            subject_ref.as_str(),
            owner_id.as_str(),
            metadata.title,
            metadata.thumbnail,
            flashcards,
        );

        self.stage(Stage::Persist, job, cancel, self.results.save(&set))
            .await?;

        info!(job_id = %job.id, "Generated {} flashcards", set.flashcards.len());
        Ok(set)
    }

    /// Acquire, compress and transcribe. The caller cleans up the workspace.
    async fn audio_to_text(
        &self,
        job: &Job,
        subject_ref: &str,
        workspace: &AudioWorkspace,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, StageError> {
        let source = workspace.source_path();
        self.stage(Stage::AudioAcquire, job, cancel, async {
            self.adapters.acquirer.acquire(subject_ref, &source).await?;
            require_artifact(&source).await
        })
        .await?;

        let compressed = workspace.compressed_path();
        self.stage(Stage::AudioCompress, job, cancel, async {
            self.adapters
                .compressor
                .compress(&source, &compressed, self.config.audio_bitrate_kbps)
                .await?;
            require_artifact(&compressed).await?;
            tokio::fs::remove_file(&source).await?;
            Ok::<(), JottaError>(())
        })
        .await?;

        self.stage(Stage::Transcribe, job, cancel, self.transcribe(&compressed, cancel))
            .await
    }

    async fn transcribe(&self, audio: &Path, cancel: &CancellationToken) -> Result<String> {
        let transcriber = self.adapters.transcriber.as_ref();

        let handle = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JottaError::Cancelled("transcription upload interrupted".to_string()));
            }
            submitted = tokio::time::timeout(self.config.stage_timeout, transcriber.submit(audio)) => {
                submitted.map_err(|_| JottaError::Timeout("transcription upload".to_string()))??
            }
        };
        info!("Submitted transcript {}", handle);

        wait_for_transcript(transcriber, &handle, self.config.poll, cancel).await
    }

    async fn summarize(&self, transcript: &str) -> Result<String> {
        if transcript.trim().is_empty() {
            return Err(JottaError::Summarization("transcript is empty".to_string()));
        }

        let chunks: Vec<String> = chunk_text(transcript, self.config.chunk_size)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        info!("Summarizing {} chunks", chunks.len());

        let summarizer = &self.adapters.summarizer;
        let summaries: Vec<String> = stream::iter(chunks)
            .map(|chunk| async move { summarizer.summarize(&chunk).await })
            .buffered(self.config.summarize_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(summaries.join("\n"))
    }

    /// Run one stage with logging, a time limit and cancellation.
    async fn stage<T, F>(
        &self,
        stage: Stage,
        job: &Job,
        cancel: &CancellationToken,
        work: F,
    ) -> std::result::Result<T, StageError>
    where
        F: Future<Output = Result<T>>,
    {
        info!(job_id = %job.id, stage = %stage, "Stage started");
        let started = Instant::now();

        let outcome = if stage == Stage::Transcribe {
            // bounded by the poll policy and handles cancellation itself
            work.await
        } else {
            tokio::select! {
                _ = cancel.cancelled() => Err(JottaError::Cancelled(format!("{} interrupted", stage))),
                timed = tokio::time::timeout(self.config.stage_timeout, work) => {
                    timed.unwrap_or_else(|_| {
                        Err(JottaError::Timeout(format!(
                            "{} exceeded {:?}",
                            stage, self.config.stage_timeout
                        )))
                    })
                }
            }
        };

        match &outcome {
            Ok(_) => info!(
                job_id = %job.id,
                stage = %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage finished"
            ),
            Err(e) => warn!(job_id = %job.id, stage = %stage, kind = %e.kind(), "Stage failed: {}", e),
        }

        outcome.map_err(|e| StageError::new(stage, &job.id, e))
    }
}

async fn require_artifact(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(JottaError::ArtifactMissing(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::queue::JobPayload;
    use crate::store::MemoryStore;
    use crate::testing::{CopyCompressor, FakeAcquirer, FakeMetadata, FakeSummarizer, ScriptedTranscriber};
    use crate::transcription::TranscriptStatus;
    use tempfile::TempDir;

    struct Harness {
        executor: PipelineExecutor,
        store: Arc<MemoryStore>,
        transcriber: Arc<ScriptedTranscriber>,
        summarizer: Arc<FakeSummarizer>,
        work_dir: TempDir,
    }

    fn harness(
        metadata: FakeMetadata,
        acquirer: FakeAcquirer,
        transcriber: ScriptedTranscriber,
        summarizer: FakeSummarizer,
    ) -> Harness {
        let work_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let transcriber = Arc::new(transcriber);
        let summarizer = Arc::new(summarizer);
        let adapters = Adapters {
            metadata: Arc::new(metadata),
            acquirer: Arc::new(acquirer),
            compressor: Arc::new(CopyCompressor),
            transcriber: transcriber.clone(),
            summarizer: summarizer.clone(),
        };
        let config = PipelineConfig {
            chunk_size: 500,
            audio_bitrate_kbps: 64,
            stage_timeout: Duration::from_secs(5),
            poll: PollPolicy {
                interval: Duration::from_millis(1),
                max_wait: Duration::from_secs(5),
            },
            summarize_concurrency: 2,
        };
        let executor = PipelineExecutor::new(
            adapters,
            store.clone(),
            config,
            work_dir.path().to_path_buf(),
        );
        Harness {
            executor,
            store,
            transcriber,
            summarizer,
            work_dir,
        }
    }

    fn claimed_job() -> Job {
        let mut job = Job::new(JobPayload::generate_flashcards("abc123", "u1"));
        job.attempts = 1;
        job
    }

    fn workspace_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_generates_flashcards_in_summary_order() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![vec![
                TranscriptStatus::Processing,
                TranscriptStatus::Completed("some transcript text".to_string()),
            ]]),
            FakeSummarizer::fixed("Line1\nLine2"),
        );

        let set = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap();

        let cards: Vec<_> = set.flashcards.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(cards, vec!["Line1", "Line2"]);
        assert_eq!(set.title, "T");

        let stored = h.store.get("abc123", "u1").await.unwrap().unwrap();
        assert_eq!(stored.flashcards, set.flashcards);
        assert!(workspace_is_empty(&h.work_dir));
    }

    #[tokio::test]
    async fn test_chunks_summarized_in_order() {
        let transcript: String = "a".repeat(500) + &"b".repeat(500) + &"c".repeat(120);
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![vec![TranscriptStatus::Completed(transcript)]]),
            FakeSummarizer::first_char(),
        );

        let set = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap();

        let cards: Vec<_> = set.flashcards.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(cards, vec!["a", "b", "c"]);
        assert_eq!(h.summarizer.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_media_fails_first_stage() {
        let h = harness(
            FakeMetadata::missing(),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![]),
            FakeSummarizer::identity(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::MetadataFetch);
        assert_eq!(err.kind(), ErrorKind::PermanentExternal);
        assert_eq!(h.transcriber.submits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_exceeding_timeout_fails_transiently() {
        let h = harness(
            FakeMetadata::hanging(),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![]),
            FakeSummarizer::identity(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::MetadataFetch);
        assert!(matches!(err.source, JottaError::Timeout(_)));
        assert_eq!(err.kind(), ErrorKind::TransientExternal);
        assert_eq!(h.transcriber.submits(), 0);
        assert!(workspace_is_empty(&h.work_dir));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_resource_failure() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::produces_nothing(),
            ScriptedTranscriber::new(vec![]),
            FakeSummarizer::identity(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::AudioAcquire);
        assert!(matches!(err.source, JottaError::ArtifactMissing(_)));
        assert!(workspace_is_empty(&h.work_dir));
    }

    #[tokio::test]
    async fn test_remote_transcription_failure_cleans_up() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![vec![TranscriptStatus::Failed("bad audio".into())]]),
            FakeSummarizer::identity(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Transcribe);
        assert!(matches!(err.source, JottaError::TranscriptionFailed(_)));
        assert!(workspace_is_empty(&h.work_dir));
        assert!(h.store.get("abc123", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_transcript_fails_summarize() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![vec![TranscriptStatus::Completed("  ".into())]]),
            FakeSummarizer::identity(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Summarize);
        assert_eq!(h.summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_summarize() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::new(vec![vec![TranscriptStatus::Completed("x".repeat(1200))]]),
            FakeSummarizer::failing(),
        );

        let err = h.executor.run(&claimed_job(), &CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.stage, Stage::Summarize);
        assert!(h.store.get("abc123", "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_transcription() {
        let h = harness(
            FakeMetadata::new("T"),
            FakeAcquirer::new(),
            ScriptedTranscriber::never_finishes(),
            FakeSummarizer::identity(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = h.executor.run(&claimed_job(), &cancel).await.unwrap_err();

        assert_eq!(err.stage, Stage::Transcribe);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(h.transcriber.cancel_count(), 1);
        assert!(workspace_is_empty(&h.work_dir));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::MetadataFetch.to_string(), "metadata_fetch");
        assert_eq!(Stage::Transcribe.to_string(), "transcribe");
    }
}
