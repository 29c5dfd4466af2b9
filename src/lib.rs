//! Jotta - Video to Flashcards
//!
//! Turns YouTube videos into study flashcards through a durable job queue.
//!
//! The name "Jotta" comes from the Norwegian "jotte", a quick note.
//!
//! # Overview
//!
//! A submission becomes a job. Workers claim jobs and run them through a
//! fixed pipeline:
//!
//! 1. fetch video metadata
//! 2. download and compress the audio track
//! 3. transcribe it with a remote service, polling until it finishes
//! 4. summarize the transcript in fixed-size chunks
//! 5. split the summary into flashcards and store them
//!
//! Failed attempts are retried with a fixed backoff up to a bounded number of
//! attempts. Jobs and flashcard sets live in one SQLite database, so an
//! interrupted process picks up where it left off.
//!
//! # Architecture
//!
//! - `config` - Configuration management and prompt templates
//! - `metadata` - Video id parsing and metadata lookup
//! - `audio` - Audio download and compression
//! - `transcription` - Speech-to-text with a bounded poll loop
//! - `summarization` - Chunk summarization providers
//! - `chunking` - Fixed-size text chunking
//! - `flashcards` - Flashcard types and assembly
//! - `queue` - Jobs, retry policy and the worker pool
//! - `store` - Job and result persistence
//! - `pipeline` - The per-job stage executor
//! - `orchestrator` - Service object tying it together
//!
//! # Example
//!
//! ```rust,no_run
//! use jotta::config::Settings;
//! use jotta::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::with_workers(settings)?;
//!     orchestrator.start_workers()?;
//!
//!     let job = orchestrator.submit("https://youtu.be/dQw4w9WgXcQ", "me").await?;
//!     println!("Queued job {}", job.id);
//!
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod error;
pub mod flashcards;
pub mod metadata;
pub mod openai;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod summarization;
pub mod transcription;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{JottaError, Result};
