//! Flashcard sets: the result document of a successful pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single flashcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub content: String,
}

/// All flashcards generated for one video and owner.
///
/// Unique per `(subject_ref, owner_id)`. Always written as one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub subject_ref: String,
    pub owner_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    /// In summary emission order.
    pub flashcards: Vec<Flashcard>,
    pub created_at: DateTime<Utc>,
}

impl FlashcardSet {
    pub fn new(
        subject_ref: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        thumbnail: Option<String>,
        flashcards: Vec<Flashcard>,
    ) -> Self {
        Self {
            subject_ref: subject_ref.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            thumbnail,
            flashcards,
            created_at: Utc::now(),
        }
    }

    /// Lightweight reference stored on the completed job.
    pub fn reference(&self) -> FlashcardSetRef {
        FlashcardSetRef {
            subject_ref: self.subject_ref.clone(),
            owner_id: self.owner_id.clone(),
            card_count: self.flashcards.len(),
        }
    }
}

/// Pointer from a completed job to its flashcard set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardSetRef {
    pub subject_ref: String,
    pub owner_id: String,
    pub card_count: usize,
}

/// Turn a newline-separated summary into flashcards.
///
/// Blank lines are dropped; every other line becomes one card, in order.
pub fn assemble_flashcards(summary: &str) -> Vec<Flashcard> {
    summary
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Flashcard {
            content: line.to_string(),
        })
        .collect()
}
