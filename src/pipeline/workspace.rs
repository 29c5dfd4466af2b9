//! Per-attempt scratch directory for audio artifacts.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scratch directory owned by one job attempt.
///
/// Paths are unique per `(job, attempt)` so a retry never sees a previous
/// attempt's files. The directory is removed by [`cleanup`](Self::cleanup),
/// or on drop if the attempt is abandoned mid-stage.
#[derive(Debug)]
pub struct AudioWorkspace {
    dir: PathBuf,
    cleaned: bool,
}

impl AudioWorkspace {
    pub async fn create(root: &Path, job_id: &str, attempt: u32) -> Result<Self> {
        let dir = root.join(format!("{}-{}", job_id, attempt));
        tokio::fs::create_dir_all(&dir).await?;
        debug!("Created workspace {:?}", dir);
        Ok(Self {
            dir,
            cleaned: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where acquisition writes the downloaded audio.
    pub fn source_path(&self) -> PathBuf {
        self.dir.join("source.mp3")
    }

    /// Where compression writes the re-encoded audio.
    pub fn compressed_path(&self) -> PathBuf {
        self.dir.join("compressed.mp3")
    }

    /// Remove the directory and everything in it.
    pub async fn cleanup(mut self) -> Result<()> {
        self.cleaned = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for AudioWorkspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {:?}: {}", self.dir, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_paths_are_unique_per_attempt() {
        let root = TempDir::new().unwrap();
        let first = AudioWorkspace::create(root.path(), "job-1", 1).await.unwrap();
        let second = AudioWorkspace::create(root.path(), "job-1", 2).await.unwrap();
        assert_ne!(first.source_path(), second.source_path());
        assert!(first.dir().exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_artifacts() {
        let root = TempDir::new().unwrap();
        let ws = AudioWorkspace::create(root.path(), "job-1", 1).await.unwrap();
        tokio::fs::write(ws.source_path(), b"audio").await.unwrap();
        let dir = ws.dir().to_path_buf();

        ws.cleanup().await.unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_removes_artifacts() {
        let root = TempDir::new().unwrap();
        let dir = tokio_test::block_on(async {
            let ws = AudioWorkspace::create(root.path(), "job-1", 1).await.unwrap();
            tokio::fs::write(ws.compressed_path(), b"audio").await.unwrap();
            ws.dir().to_path_buf()
        });
        assert!(!dir.exists());
    }
}
