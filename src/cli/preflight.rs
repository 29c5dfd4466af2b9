//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting operations that would otherwise fail midway.

use crate::config::{Settings, SummarizationProvider};
use crate::error::{JottaError, Result};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running jobs needs the media tools and service keys.
    Process,
    /// Submitting and querying only needs the database.
    Query,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Process => {
            check_transcription_key(settings)?;
            check_summarization_key(settings)?;
            check_tool("yt-dlp")?;
            check_tool("ffmpeg")?;
        }
        Operation::Query => {}
    }
    Ok(())
}

fn check_transcription_key(settings: &Settings) -> Result<()> {
    match settings.transcription.resolve_api_key() {
        Some(key) if !key.is_empty() => Ok(()),
        _ => Err(JottaError::Config(
            "ASSEMBLYAI_API_KEY not set. Set it with: export ASSEMBLYAI_API_KEY='...'".to_string(),
        )),
    }
}

fn check_summarization_key(settings: &Settings) -> Result<()> {
    if settings.summarization.provider != SummarizationProvider::OpenAI {
        return Ok(());
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        _ => Err(JottaError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    // ffmpeg uses -version (single dash), others use --version
    let version_arg = match name {
        "ffmpeg" | "ffprobe" => "-version",
        _ => "--version",
    };
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(JottaError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(JottaError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(JottaError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
