//! Configuration module for Jotta.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, SummarizePrompts};
pub use settings::{
    AcquisitionSettings, GeneralSettings, MetadataSettings, PipelineSettings, PromptSettings,
    QueueSettings, ServerSettings, Settings, StoreSettings, SummarizationProvider,
    SummarizationSettings, TranscriptionSettings,
};
