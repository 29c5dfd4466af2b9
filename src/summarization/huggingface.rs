//! Hugging Face inference API summarizer.

use super::{screen_input, Summarizer};
use crate::config::{Prompts, SummarizationSettings};
use crate::error::{JottaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Summarizer calling a hosted summarization model (bart-large-cnn by default).
pub struct HuggingFaceSummarizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    prompts: Prompts,
    min_input_chars: usize,
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    summary_text: String,
}

impl HuggingFaceSummarizer {
    pub fn new(settings: &SummarizationSettings, prompts: Prompts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}",
                settings.huggingface_url.trim_end_matches('/'),
                settings.model
            ),
            api_key: settings.resolve_api_key(),
            prompts,
            min_input_chars: settings.min_input_chars,
        })
    }
}

fn first_summary(items: Vec<SummaryItem>) -> Result<String> {
    let summary = items
        .into_iter()
        .next()
        .map(|item| item.summary_text.trim().to_string())
        .unwrap_or_default();

    if summary.is_empty() {
        return Err(JottaError::Summarization("Empty summary from model".to_string()));
    }
    Ok(summary)
}

#[async_trait]
impl Summarizer for HuggingFaceSummarizer {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn summarize(&self, text: &str) -> Result<String> {
        if let Some(verbatim) = screen_input(text, self.min_input_chars)? {
            return Ok(verbatim);
        }

        let prompt = self.prompts.summarize_prompt(text);

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "inputs": prompt }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(JottaError::Upstream {
                service: "huggingface".to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let items: Vec<SummaryItem> = response.json().await?;
        let summary = first_summary(items)?;
        debug!("Summarized {} chars into {}", text.len(), summary.len());
        Ok(summary)
    }
}
