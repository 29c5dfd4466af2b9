//! Scripted fake adapters for tests.

use crate::audio::{AudioCompressor, MediaAcquire};
use crate::error::{JottaError, Result};
use crate::metadata::{MetadataLookup, VideoMetadata};
use crate::summarization::Summarizer;
use crate::transcription::{TranscriptHandle, TranscriptStatus, TranscriptionService};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Transcription service replaying one status script per submission.
///
/// The n-th `submit` returns handle `t{n}`, which replays the n-th script.
/// A script that runs out (or a handle without one) keeps reporting
/// `Processing`.
pub struct ScriptedTranscriber {
    scripts: Mutex<Vec<VecDeque<TranscriptStatus>>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    cancels: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(scripts: Vec<Vec<TranscriptStatus>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(VecDeque::from).collect()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn never_finishes() -> Self {
        Self::new(Vec::new())
    }

    /// Fails with `failed` on the first `failures` submissions, then completes.
    pub fn failing_then(failures: usize, text: &str) -> Self {
        let mut scripts: Vec<Vec<TranscriptStatus>> = (0..failures)
            .map(|i| vec![TranscriptStatus::Failed(format!("attempt {} failed", i + 1))])
            .collect();
        scripts.push(vec![
            TranscriptStatus::Processing,
            TranscriptStatus::Completed(text.to_string()),
        ]);
        Self::new(scripts)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionService for ScriptedTranscriber {
    async fn submit(&self, audio_path: &Path) -> Result<TranscriptHandle> {
        if !audio_path.exists() {
            return Err(JottaError::ArtifactMissing(audio_path.to_path_buf()));
        }
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TranscriptHandle(format!("t{}", n)))
    }

    async fn poll(&self, handle: &TranscriptHandle) -> Result<TranscriptStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let index = handle
            .0
            .strip_prefix('t')
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1));

        let mut scripts = self.scripts.lock().unwrap();
        let next = index
            .and_then(|i| scripts.get_mut(i))
            .and_then(|script| script.pop_front());
        Ok(next.unwrap_or(TranscriptStatus::Processing))
    }

    async fn cancel(&self, _handle: &TranscriptHandle) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

enum MetadataMode {
    Found(String),
    Missing,
    Hanging,
    PanicsFirst(usize, String),
}

/// Metadata lookup with canned behaviour.
pub struct FakeMetadata {
    mode: MetadataMode,
    calls: AtomicUsize,
}

impl FakeMetadata {
    fn with_mode(mode: MetadataMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn new(title: &str) -> Self {
        Self::with_mode(MetadataMode::Found(title.to_string()))
    }

    pub fn missing() -> Self {
        Self::with_mode(MetadataMode::Missing)
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::with_mode(MetadataMode::Hanging)
    }

    /// Panics on the first `n` lookups, then finds the video.
    pub fn panicking_then(n: usize, title: &str) -> Self {
        Self::with_mode(MetadataMode::PanicsFirst(n, title.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn found(subject_ref: &str, title: &str) -> VideoMetadata {
    VideoMetadata {
        title: title.to_string(),
        thumbnail: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", subject_ref)),
    }
}

#[async_trait]
impl MetadataLookup for FakeMetadata {
    async fn lookup(&self, subject_ref: &str) -> Result<VideoMetadata> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.mode {
            MetadataMode::Found(title) => Ok(found(subject_ref, title)),
            MetadataMode::Missing => Err(JottaError::MediaNotFound(subject_ref.to_string())),
            MetadataMode::Hanging => std::future::pending().await,
            MetadataMode::PanicsFirst(n, title) => {
                if call <= *n {
                    panic!("metadata lookup {} blew up", call);
                }
                Ok(found(subject_ref, title))
            }
        }
    }
}

/// Acquirer writing a few bytes of fake audio.
pub struct FakeAcquirer {
    writes: bool,
    calls: AtomicUsize,
}

impl FakeAcquirer {
    pub fn new() -> Self {
        Self {
            writes: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reports success without producing a file.
    pub fn produces_nothing() -> Self {
        Self {
            writes: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaAcquire for FakeAcquirer {
    async fn acquire(&self, _subject_ref: &str, dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.writes {
            tokio::fs::write(dest, b"ID3 fake audio").await?;
        }
        Ok(())
    }
}

/// Compressor that copies the source unchanged.
pub struct CopyCompressor;

#[async_trait]
impl AudioCompressor for CopyCompressor {
    async fn compress(&self, source: &Path, dest: &Path, _bitrate_kbps: u32) -> Result<()> {
        tokio::fs::copy(source, dest).await?;
        Ok(())
    }
}

enum SummaryMode {
    Identity,
    Fixed(String),
    FirstChar,
    Failing,
}

/// Summarizer with canned behaviour.
pub struct FakeSummarizer {
    mode: SummaryMode,
    calls: AtomicUsize,
}

impl FakeSummarizer {
    fn with_mode(mode: SummaryMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn identity() -> Self {
        Self::with_mode(SummaryMode::Identity)
    }

    pub fn fixed(summary: &str) -> Self {
        Self::with_mode(SummaryMode::Fixed(summary.to_string()))
    }

    /// Summarizes each chunk to its first character.
    pub fn first_char() -> Self {
        Self::with_mode(SummaryMode::FirstChar)
    }

    pub fn failing() -> Self {
        Self::with_mode(SummaryMode::Failing)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            return Err(JottaError::InvalidInput("cannot summarize empty text".to_string()));
        }
        match &self.mode {
            SummaryMode::Identity => Ok(text.trim().to_string()),
            SummaryMode::Fixed(summary) => Ok(summary.clone()),
            SummaryMode::FirstChar => Ok(text.chars().take(1).collect()),
            SummaryMode::Failing => Err(JottaError::Upstream {
                service: "fake".to_string(),
                status: 503,
                message: "overloaded".to_string(),
            }),
        }
    }
}

/// Settings for an orchestrator on the memory store with no backoff.
pub fn fast_settings(temp: &tempfile::TempDir) -> crate::config::Settings {
    let mut settings = crate::config::Settings::default();
    settings.general.temp_dir = temp.path().join("work").to_string_lossy().to_string();
    settings.store.provider = "memory".to_string();
    settings.queue.backoff_seconds = 0;
    settings.queue.dispatch_interval_ms = 10;
    settings.transcription.poll_interval_seconds = 0;
    settings
}

/// Orchestrator wired to fakes: metadata titled `T`, a fixed summary and the
/// given transcriber. Workers are not started.
pub fn fake_orchestrator(
    temp: &tempfile::TempDir,
    transcriber: ScriptedTranscriber,
    summary: &str,
) -> crate::orchestrator::Orchestrator {
    use crate::pipeline::Adapters;
    use crate::store::{MemoryStore, Stores};
    use std::sync::Arc;

    let adapters = Adapters {
        metadata: Arc::new(FakeMetadata::new("T")),
        acquirer: Arc::new(FakeAcquirer::new()),
        compressor: Arc::new(CopyCompressor),
        transcriber: Arc::new(transcriber),
        summarizer: Arc::new(FakeSummarizer::fixed(summary)),
    };
    let stores = Stores::new(Arc::new(MemoryStore::new()));
    crate::orchestrator::Orchestrator::with_components(fast_settings(temp), stores, adapters)
        .unwrap()
}
