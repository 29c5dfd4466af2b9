//! AssemblyAI transcription implementation.

use super::{TranscriptHandle, TranscriptStatus, TranscriptionService};
use crate::config::TranscriptionSettings;
use crate::error::{JottaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SERVICE: &str = "assemblyai";

/// Transcriber backed by the AssemblyAI REST API.
pub struct AssemblyAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AssemblyAiTranscriber {
    /// Create a transcriber from settings. Fails if no API key is available.
    pub fn new(settings: &TranscriptionSettings) -> Result<Self> {
        Self::with_api_key(settings, settings.resolve_api_key())
    }

    fn with_api_key(settings: &TranscriptionSettings, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            JottaError::Config(
                "ASSEMBLYAI_API_KEY not set. Set it with: export ASSEMBLYAI_API_KEY='...'"
                    .to_string(),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Turn a non-2xx response into an upstream error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(JottaError::Upstream {
            service: SERVICE.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn upload(&self, audio_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        debug!("Uploading {} bytes", bytes.len());

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;

        let body: UploadResponse = Self::check(response).await?.json().await?;
        Ok(body.upload_url)
    }
}

/// Map AssemblyAI's status strings onto [`TranscriptStatus`].
fn parse_status(body: TranscriptResponse) -> TranscriptStatus {
    match body.status.as_str() {
        "queued" => TranscriptStatus::Queued,
        "processing" => TranscriptStatus::Processing,
        "completed" => TranscriptStatus::Completed(body.text.unwrap_or_default()),
        "error" | "failed" => TranscriptStatus::Failed(
            body.error
                .unwrap_or_else(|| "AssemblyAI transcription failed.".to_string()),
        ),
        other => TranscriptStatus::Failed(format!("unknown transcript status '{}'", other)),
    }
}

#[async_trait]
impl TranscriptionService for AssemblyAiTranscriber {
    async fn submit(&self, audio_path: &Path) -> Result<TranscriptHandle> {
        let audio_url = self.upload(audio_path).await?;
        info!("Audio uploaded. Starting transcription...");

        let response = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await?;

        let body: TranscriptResponse = Self::check(response).await?.json().await?;
        Ok(TranscriptHandle(body.id))
    }

    async fn poll(&self, handle: &TranscriptHandle) -> Result<TranscriptStatus> {
        let response = self
            .client
            .get(format!("{}/transcript/{}", self.base_url, handle))
            .header("authorization", &self.api_key)
            .send()
            .await?;

        let body: TranscriptResponse = Self::check(response).await?.json().await?;
        Ok(parse_status(body))
    }

    async fn cancel(&self, handle: &TranscriptHandle) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/transcript/{}", self.base_url, handle))
            .header("authorization", &self.api_key)
            .send()
            .await?;

        Self::check(response).await?;
        debug!("Cancelled remote transcript {}", handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TranscriptResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status(response(r#"{"id": "a", "status": "queued"}"#)),
            TranscriptStatus::Queued
        );
        assert_eq!(
            parse_status(response(r#"{"id": "a", "status": "processing", "text": null}"#)),
            TranscriptStatus::Processing
        );
        assert_eq!(
            parse_status(response(r#"{"id": "a", "status": "completed", "text": "hi there"}"#)),
            TranscriptStatus::Completed("hi there".to_string())
        );
        assert_eq!(
            parse_status(response(r#"{"id": "a", "status": "error", "error": "no speech"}"#)),
            TranscriptStatus::Failed("no speech".to_string())
        );
    }

    #[test]
    fn test_new_uses_configured_key() {
        let settings = TranscriptionSettings {
            api_key: Some("key".to_string()),
            base_url: "https://api.assemblyai.com/v2/".to_string(),
            ..Default::default()
        };
        let transcriber = AssemblyAiTranscriber::new(&settings).unwrap();
        assert_eq!(transcriber.api_key, "key");
        assert_eq!(transcriber.base_url, "https://api.assemblyai.com/v2");
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let settings = TranscriptionSettings {
            api_key: None,
            ..Default::default()
        };
        let err = AssemblyAiTranscriber::with_api_key(&settings, None)
            .err()
            .unwrap();
        assert!(matches!(err, JottaError::Config(ref msg) if msg.contains("ASSEMBLYAI_API_KEY")));
    }
}
