//! CLI module for Jotta.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Jotta - Video to Flashcards
///
/// Queue videos, let workers transcribe and summarize them, and collect the
/// resulting study flashcards.
#[derive(Parser, Debug)]
#[command(name = "jotta")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Owner of submitted jobs and flashcards
    #[arg(long, env = "JOTTA_OWNER", default_value = "local", global = true)]
    pub owner: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check system requirements and configuration
    Doctor,

    /// Queue flashcard generation for a video
    Submit {
        /// YouTube URL or video ID
        input: String,

        /// Wait for the job to finish and print the flashcards
        #[arg(short, long)]
        wait: bool,

        /// Run the job in this process instead of leaving it to a worker (implies --wait)
        #[arg(long)]
        local: bool,
    },

    /// Show the state of a job
    Status {
        /// Job ID returned by submit
        job_id: String,
    },

    /// List flashcard sets
    List,

    /// Print the flashcards for a video
    Show {
        /// YouTube URL or video ID
        input: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the flashcards for a video
    Delete {
        /// YouTube URL or video ID
        input: String,
    },

    /// Run workers that process queued jobs until interrupted
    Worker {
        /// Number of workers (overrides queue.workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Start the HTTP API server
    Serve {
        /// Host to bind to (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Only accept and answer requests; leave processing to `jotta worker`
        #[arg(long)]
        no_workers: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from(["jotta", "--owner", "u1", "submit", "abc123", "--wait"]).unwrap();
        assert_eq!(cli.owner, "u1");
        match cli.command {
            Commands::Submit { input, wait, local } => {
                assert_eq!(input, "abc123");
                assert!(wait);
                assert!(!local);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from(["jotta", "serve", "--port", "8080", "--no-workers"]).unwrap();
        match cli.command {
            Commands::Serve { host, port, no_workers } => {
                assert!(host.is_none());
                assert_eq!(port, Some(8080));
                assert!(no_workers);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
