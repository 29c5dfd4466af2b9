//! Video metadata lookup.
//!
//! Resolves a subject reference (a YouTube video id) to the title and
//! thumbnail that are stored alongside the generated flashcards.

mod oembed;
mod subject;

pub use oembed::OEmbedLookup;
pub use subject::{parse_subject_ref, watch_url};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Title and thumbnail for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub thumbnail: Option<String>,
}

/// Trait for metadata providers.
///
/// Implementations must report a missing or private video as
/// [`JottaError::MediaNotFound`](crate::error::JottaError::MediaNotFound), and
/// network trouble as a transient error.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, subject_ref: &str) -> Result<VideoMetadata>;
}
