//! OpenAI chat completion summarizer.

use super::{screen_input, Summarizer};
use crate::config::{Prompts, SummarizationSettings};
use crate::error::{JottaError, Result};
use crate::openai::create_client_with_timeout;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Summarizer using an OpenAI chat model.
pub struct OpenAISummarizer {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    prompts: Prompts,
    min_input_chars: usize,
}

impl OpenAISummarizer {
    pub fn new(settings: &SummarizationSettings, prompts: Prompts) -> Self {
        Self {
            client: create_client_with_timeout(Duration::from_secs(settings.timeout_seconds)),
            model: settings.model.clone(),
            prompts,
            min_input_chars: settings.min_input_chars,
        }
    }
}

#[async_trait]
impl Summarizer for OpenAISummarizer {
    #[instrument(skip(self, text), fields(chars = text.len(), model = %self.model))]
    async fn summarize(&self, text: &str) -> Result<String> {
        if let Some(verbatim) = screen_input(text, self.min_input_chars)? {
            return Ok(verbatim);
        }

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.prompts.summarize.system.clone())
                .build()
                .map_err(|e| JottaError::Summarization(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(self.prompts.summarize_prompt(text))
                .build()
                .map_err(|e| JottaError::Summarization(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.2)
            .build()
            .map_err(|e| JottaError::Summarization(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| JottaError::OpenAI(format!("Failed to get summary: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| JottaError::Summarization("Empty response from LLM".to_string()))?;

        debug!("Summary: {}", content.chars().take(200).collect::<String>());
        Ok(content)
    }
}
