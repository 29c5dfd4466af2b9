//! ffmpeg based audio compression.

use super::AudioCompressor;
use crate::error::{JottaError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Re-encodes audio to MP3 at a fixed bitrate using ffmpeg.
#[derive(Debug, Default, Clone)]
pub struct FfmpegCompressor;

impl FfmpegCompressor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioCompressor for FfmpegCompressor {
    #[instrument(skip_all, fields(source = %source.display(), bitrate_kbps = bitrate_kbps))]
    async fn compress(&self, source: &Path, dest: &Path, bitrate_kbps: u32) -> Result<()> {
        debug!("Compressing {:?} to {}k", source, bitrate_kbps);

        let result = Command::new("ffmpeg")
            .arg("-i").arg(source)
            .arg("-vn")
            .arg("-codec:a").arg("libmp3lame")
            .arg("-b:a").arg(format!("{}k", bitrate_kbps))
            .arg("-y")
            .arg("-loglevel").arg("error")
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => {
                let err = String::from_utf8_lossy(&out.stderr);
                Err(JottaError::ExtractionFailed(format!("ffmpeg compression failed: {err}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(JottaError::ToolNotFound("ffmpeg".into()))
            }
            Err(e) => Err(JottaError::ExtractionFailed(format!("ffmpeg error: {e}"))),
        }
    }
}
