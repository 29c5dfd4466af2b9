//! Audio acquisition and compression.
//!
//! This module provides the capabilities behind the AudioAcquire and
//! AudioCompress stages: downloading a video's audio track with yt-dlp and
//! re-encoding it to a fixed bitrate with ffmpeg.

mod compress;
mod ytdlp;

pub use compress::FfmpegCompressor;
pub use ytdlp::YtDlpAcquirer;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Produces a local audio artifact for a subject reference.
#[async_trait]
pub trait MediaAcquire: Send + Sync {
    /// Download audio for `subject_ref` to `dest`.
    ///
    /// Errors distinguish an unavailable source
    /// ([`SourceUnavailable`](crate::error::JottaError::SourceUnavailable)) from
    /// a failed extraction
    /// ([`ExtractionFailed`](crate::error::JottaError::ExtractionFailed)).
    async fn acquire(&self, subject_ref: &str, dest: &Path) -> Result<()>;
}

/// Re-encodes an audio file to a target bitrate.
#[async_trait]
pub trait AudioCompressor: Send + Sync {
    async fn compress(&self, source: &Path, dest: &Path, bitrate_kbps: u32) -> Result<()>;
}
