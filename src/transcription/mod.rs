//! Transcription module for Jotta.
//!
//! Speech-to-text is an asynchronous remote job: audio is uploaded, a
//! transcript is requested, and the request is polled until it settles.
//!
//! # Polling
//!
//! [`wait_for_transcript`] replaces an open-ended poll with a bounded loop:
//! it polls on a fixed interval, gives up after an overall ceiling, and stops
//! as soon as its cancellation token fires. On give-up or cancellation the
//! remote job is cancelled so it does not keep running unobserved.

mod assemblyai;
mod poll;

pub use assemblyai::AssemblyAiTranscriber;
pub use poll::{wait_for_transcript, PollPolicy};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opaque id of a remote transcription job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptHandle(pub String);

impl std::fmt::Display for TranscriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a remote transcription job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptStatus {
    Queued,
    Processing,
    Completed(String),
    Failed(String),
}

/// Trait for remote transcription services.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Upload the audio file and request a transcript.
    async fn submit(&self, audio_path: &Path) -> Result<TranscriptHandle>;

    /// Fetch the current state of a transcript request.
    async fn poll(&self, handle: &TranscriptHandle) -> Result<TranscriptStatus>;

    /// Cancel or delete a transcript request that is no longer wanted.
    async fn cancel(&self, handle: &TranscriptHandle) -> Result<()>;
}
