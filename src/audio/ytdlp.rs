//! yt-dlp based audio acquisition.

use super::MediaAcquire;
use crate::config::AcquisitionSettings;
use crate::error::{JottaError, Result};
use crate::metadata::watch_url;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Phrases yt-dlp prints when the video itself cannot be fetched.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video is not available",
    "This video has been removed",
    "Sign in to confirm your age",
    "is not a valid URL",
];

/// Downloads audio tracks with yt-dlp.
pub struct YtDlpAcquirer {
    audio_quality: String,
}

impl YtDlpAcquirer {
    pub fn new(settings: &AcquisitionSettings) -> Self {
        Self {
            audio_quality: settings.audio_quality.clone(),
        }
    }
}

impl Default for YtDlpAcquirer {
    fn default() -> Self {
        Self::new(&AcquisitionSettings::default())
    }
}

/// Classify a failed yt-dlp run from its stderr.
fn classify_failure(stderr: &str) -> JottaError {
    let message = stderr.trim().to_string();
    if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
        JottaError::SourceUnavailable(message)
    } else {
        JottaError::ExtractionFailed(format!("yt-dlp failed: {}", message))
    }
}

/// Locate the file yt-dlp produced for `stem` inside `dir`.
fn find_output(dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in &["mp3", "m4a", "opus", "webm", "ogg"] {
        let candidate = dir.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[async_trait]
impl MediaAcquire for YtDlpAcquirer {
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn acquire(&self, subject_ref: &str, dest: &Path) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| JottaError::InvalidInput(format!("No parent dir for {:?}", dest)))?;
        let stem = dest
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| JottaError::InvalidInput(format!("Bad audio path {:?}", dest)))?;
        tokio::fs::create_dir_all(dir).await?;

        let template = dir.join(format!("{}.%(ext)s", stem));
        let url = watch_url(subject_ref);
        info!("Downloading audio from {}", url);

        let result = Command::new("yt-dlp")
            .arg("--extract-audio")
            .arg("--audio-format").arg("mp3")
            .arg("--audio-quality").arg(&self.audio_quality)
            .arg("--output").arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JottaError::ToolNotFound("yt-dlp".into()));
            }
            Err(e) => {
                return Err(JottaError::ExtractionFailed(format!("yt-dlp execution failed: {e}")));
            }
        };

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        // yt-dlp names the file after the template; normalise onto `dest`
        if let Some(produced) = find_output(dir, stem) {
            if produced != dest {
                debug!("Renaming {:?} to {:?}", produced, dest);
                tokio::fs::rename(&produced, dest).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("ERROR: [youtube] abc: Video unavailable");
        assert!(matches!(err, JottaError::SourceUnavailable(_)));

        let err = classify_failure("ERROR: Postprocessing: audio conversion failed");
        assert!(matches!(err, JottaError::ExtractionFailed(_)));
    }

    #[test]
    fn test_find_output_prefers_mp3() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("source.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("source.mp3"), b"x").unwrap();

        assert_eq!(
            find_output(dir.path(), "source"),
            Some(dir.path().join("source.mp3"))
        );
        assert_eq!(find_output(dir.path(), "other"), None);
    }
}
