//! Configuration settings for Jotta.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub queue: QueueSettings,
    pub pipeline: PipelineSettings,
    pub metadata: MetadataSettings,
    pub acquisition: AcquisitionSettings,
    pub transcription: TranscriptionSettings,
    pub summarization: SummarizationSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary audio files.
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.jotta".to_string(),
            temp_dir: "/tmp/jotta".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Job queue and retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum execution attempts per job (including the first).
    pub max_attempts: u32,
    /// Fixed delay before a failed attempt becomes dispatchable again.
    pub backoff_seconds: u64,
    /// Number of concurrent workers.
    pub workers: usize,
    /// How long an idle worker waits before looking for work again.
    pub dispatch_interval_ms: u64,
    /// How long a claim holds a job without renewal. Workers renew at a
    /// third of this; a job whose lease lapses is claimable again.
    pub lease_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_seconds: 5,
            workers: 2,
            dispatch_interval_ms: 500,
            lease_seconds: 60,
        }
    }
}

/// Pipeline stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Characters per summarization chunk.
    pub chunk_size: usize,
    /// Target bitrate for compressed audio, in kbps.
    pub audio_bitrate_kbps: u32,
    /// Maximum duration of any single stage (except transcription polling).
    pub stage_timeout_seconds: u64,
    /// Number of chunks summarized concurrently (output order is preserved).
    pub summarize_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            audio_bitrate_kbps: 64,
            stage_timeout_seconds: 900,
            summarize_concurrency: 1,
        }
    }
}

/// Video metadata lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    /// oEmbed endpoint used for title and thumbnail lookup.
    pub oembed_url: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            oembed_url: "https://www.youtube.com/oembed".to_string(),
            timeout_seconds: 30,
        }
    }
}

/// Audio acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// yt-dlp audio quality for the downloaded file.
    pub audio_quality: String,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            audio_quality: "128K".to_string(),
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Base URL of the AssemblyAI API.
    pub base_url: String,
    /// API key. Falls back to `ASSEMBLYAI_API_KEY`.
    pub api_key: Option<String>,
    /// Interval between status polls.
    pub poll_interval_seconds: u64,
    /// Overall ceiling on waiting for a transcript.
    pub max_wait_seconds: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.assemblyai.com/v2".to_string(),
            api_key: None,
            poll_interval_seconds: 5,
            max_wait_seconds: 3600,
            request_timeout_seconds: 300,
        }
    }
}

impl TranscriptionSettings {
    /// Resolve the API key from settings or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), "ASSEMBLYAI_API_KEY")
    }
}

/// Summarization provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummarizationProvider {
    /// Hugging Face inference API (bart-large-cnn by default).
    #[default]
    HuggingFace,
    /// OpenAI chat completions.
    OpenAI,
}

impl std::str::FromStr for SummarizationProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(SummarizationProvider::HuggingFace),
            "openai" => Ok(SummarizationProvider::OpenAI),
            _ => Err(format!("Unknown summarization provider: {}", s)),
        }
    }
}

impl std::fmt::Display for SummarizationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummarizationProvider::HuggingFace => write!(f, "huggingface"),
            SummarizationProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Summarization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationSettings {
    /// Which summarization backend to use.
    pub provider: SummarizationProvider,
    /// Model name (Hugging Face model id or OpenAI model).
    pub model: String,
    /// Base URL of the Hugging Face inference API.
    pub huggingface_url: String,
    /// Hugging Face API key. Falls back to `HUGGINGFACE_API_KEY`.
    pub api_key: Option<String>,
    /// Inputs shorter than this are returned as-is instead of being sent out.
    pub min_input_chars: usize,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for SummarizationSettings {
    fn default() -> Self {
        Self {
            provider: SummarizationProvider::HuggingFace,
            model: "facebook/bart-large-cnn".to_string(),
            huggingface_url: "https://api-inference.huggingface.co/models".to_string(),
            api_key: None,
            min_input_chars: 40,
            timeout_seconds: 30,
        }
    }
}

impl SummarizationSettings {
    /// Resolve the Hugging Face API key from settings or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key.as_deref(), "HUGGINGFACE_API_KEY")
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: String,
    /// Path to the SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.jotta/jotta.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

fn resolve_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .filter(|k| !k.is_empty())
        .map(|k| k.to_string())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::JottaError;

        if self.queue.max_attempts == 0 {
            return Err(JottaError::Config("queue.max_attempts must be at least 1".into()));
        }
        if self.queue.workers == 0 {
            return Err(JottaError::Config("queue.workers must be at least 1".into()));
        }
        if self.queue.lease_seconds == 0 {
            return Err(JottaError::Config("queue.lease_seconds must be at least 1".into()));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(JottaError::Config("pipeline.chunk_size must be at least 1".into()));
        }
        if self.pipeline.audio_bitrate_kbps == 0 {
            return Err(JottaError::Config(
                "pipeline.audio_bitrate_kbps must be at least 1".into(),
            ));
        }
        if self.transcription.poll_interval_seconds == 0 {
            return Err(JottaError::Config(
                "transcription.poll_interval_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::JottaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jotta")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.stage_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy() {
        let settings = Settings::default();
        assert_eq!(settings.queue.max_attempts, 5);
        assert_eq!(settings.queue.backoff_seconds, 5);
        assert_eq!(settings.queue.lease_seconds, 60);
        assert_eq!(settings.pipeline.chunk_size, 500);
        assert_eq!(settings.pipeline.audio_bitrate_kbps, 64);
        assert_eq!(settings.transcription.poll_interval_seconds, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: Settings = toml::from_str(
            r#"
            [queue]
            max_attempts = 3

            [pipeline]
            chunk_size = 200

            [summarization]
            provider = "openai"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();

        assert_eq!(settings.queue.max_attempts, 3);
        assert_eq!(settings.queue.backoff_seconds, 5);
        assert_eq!(settings.pipeline.chunk_size, 200);
        assert_eq!(settings.summarization.provider, SummarizationProvider::OpenAI);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_size() {
        let mut settings = Settings::default();
        settings.pipeline.chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let mut settings = Settings::default();
        settings.queue.lease_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.store.provider, "sqlite");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut settings = Settings::default();
        settings.queue.workers = 4;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.queue.workers, 4);
    }
}
