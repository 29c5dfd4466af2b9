//! Error types for Jotta.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Library-level error type for Jotta operations.
#[derive(Error, Debug)]
pub enum JottaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Audio artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),
}

/// Coarse classification used by the queue's failure handler and the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input. Never retried.
    Validation,
    /// Conflicting active job or existing result. Never retried.
    Duplicate,
    /// A looked-up job or result does not exist.
    NotFound,
    /// Network, timeout or 5xx from an adapter.
    TransientExternal,
    /// Adapter reported an unrecoverable failure.
    PermanentExternal,
    /// Local artifact missing or unwritable, missing tool.
    Resource,
    /// Execution was cancelled by shutdown or by request.
    Cancelled,
    /// Configuration, serialization or storage failure.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::PermanentExternal => "permanent_external",
            ErrorKind::Resource => "resource",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

impl ErrorKind {
    /// Whether a stage failure of this kind is retried under the queue policy.
    ///
    /// External and resource failures are all retried up to the attempt cap,
    /// including permanent ones.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Validation | ErrorKind::Duplicate | ErrorKind::Cancelled
        )
    }
}

impl JottaError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JottaError::InvalidInput(_) => ErrorKind::Validation,
            JottaError::AlreadyExists(_) | JottaError::Conflict(_) => ErrorKind::Duplicate,
            JottaError::NotFound(_) => ErrorKind::NotFound,
            JottaError::Http(_) | JottaError::Timeout(_) | JottaError::OpenAI(_) => {
                ErrorKind::TransientExternal
            }
            JottaError::Upstream { status, .. } => {
                if *status >= 500 || *status == 429 || *status == 408 {
                    ErrorKind::TransientExternal
                } else {
                    ErrorKind::PermanentExternal
                }
            }
            JottaError::MediaNotFound(_)
            | JottaError::SourceUnavailable(_)
            | JottaError::ExtractionFailed(_)
            | JottaError::TranscriptionFailed(_)
            | JottaError::Summarization(_) => ErrorKind::PermanentExternal,
            JottaError::ArtifactMissing(_) | JottaError::Io(_) | JottaError::ToolNotFound(_) => {
                ErrorKind::Resource
            }
            JottaError::Cancelled(_) => ErrorKind::Cancelled,
            JottaError::Config(_)
            | JottaError::Json(_)
            | JottaError::TomlParse(_)
            | JottaError::Database(_)
            | JottaError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Result type alias for Jotta operations.
pub type Result<T> = std::result::Result<T, JottaError>;

/// A stage failure carrying which stage failed and for which job.
#[derive(Error, Debug)]
#[error("stage '{stage}' failed for job {job_id}: {source}")]
pub struct StageError {
    pub stage: crate::pipeline::Stage,
    pub job_id: String,
    #[source]
    pub source: JottaError,
}

impl StageError {
    pub fn new(stage: crate::pipeline::Stage, job_id: impl Into<String>, source: JottaError) -> Self {
        Self {
            stage,
            job_id: job_id.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(JottaError::InvalidInput("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(JottaError::AlreadyExists("x".into()).kind(), ErrorKind::Duplicate);
        assert_eq!(
            JottaError::ArtifactMissing(PathBuf::from("/tmp/a.mp3")).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            JottaError::TranscriptionFailed("bad audio".into()).kind(),
            ErrorKind::PermanentExternal
        );
        assert_eq!(JottaError::Cancelled("shutdown".into()).kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_upstream_status_classification() {
        let err = |status| JottaError::Upstream {
            service: "assemblyai".into(),
            status,
            message: String::new(),
        };
        assert_eq!(err(503).kind(), ErrorKind::TransientExternal);
        assert_eq!(err(429).kind(), ErrorKind::TransientExternal);
        assert_eq!(err(400).kind(), ErrorKind::PermanentExternal);
    }

    #[test]
    fn test_retry_policy_by_kind() {
        assert!(ErrorKind::TransientExternal.is_retryable());
        assert!(ErrorKind::PermanentExternal.is_retryable());
        assert!(ErrorKind::Resource.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Duplicate.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
