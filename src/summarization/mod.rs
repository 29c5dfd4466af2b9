//! Text summarization for flashcard generation.
//!
//! Each transcript chunk is condensed independently; the pipeline joins the
//! results in chunk order.

mod huggingface;
mod openai;

pub use huggingface::HuggingFaceSummarizer;
pub use openai::OpenAISummarizer;

use crate::config::{Prompts, SummarizationProvider, SummarizationSettings};
use crate::error::{JottaError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for summarization backends.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condense one chunk of text.
    ///
    /// Blank input fails with [`JottaError::InvalidInput`] for that chunk only.
    ///
    /// Input that is merely too short is not an error. Below
    /// `summarization.min_input_chars` the remote providers skip the model
    /// and return the trimmed chunk itself, so a short final chunk reaches
    /// the flashcards word for word. With `min_input_chars = 0` every
    /// non-blank chunk goes to the model.
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Screen a chunk before sending it to a remote model.
///
/// Returns `Ok(Some(text))` when the chunk is too short to be worth
/// summarizing and should be used verbatim, `Ok(None)` when it should be sent.
pub(crate) fn screen_input(text: &str, min_chars: usize) -> Result<Option<String>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(JottaError::InvalidInput("cannot summarize empty text".to_string()));
    }
    if trimmed.chars().count() < min_chars {
        return Ok(Some(trimmed.to_string()));
    }
    Ok(None)
}

/// Build the configured summarizer.
pub fn create_summarizer(
    settings: &SummarizationSettings,
    prompts: Prompts,
) -> Result<Arc<dyn Summarizer>> {
    match settings.provider {
        SummarizationProvider::HuggingFace => {
            Ok(Arc::new(HuggingFaceSummarizer::new(settings, prompts)?))
        }
        SummarizationProvider::OpenAI => Ok(Arc::new(OpenAISummarizer::new(settings, prompts))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_input() {
        assert!(screen_input("   \n ", 10).is_err());
        assert_eq!(screen_input("  tiny ", 10).unwrap(), Some("tiny".to_string()));
        assert_eq!(screen_input("long enough text here", 10).unwrap(), None);
        assert_eq!(screen_input("tiny", 0).unwrap(), None);
    }
}
