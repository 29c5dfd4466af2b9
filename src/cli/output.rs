//! CLI output formatting utilities.

use crate::flashcards::FlashcardSet;
use crate::queue::{Job, JobOutcome, JobStatus};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print one line per flashcard set.
    pub fn set_summary(set: &FlashcardSet) {
        println!(
            "  {} {} ({}, {} cards, {})",
            style("*").cyan(),
            style(&set.title).bold(),
            style(&set.subject_ref).dim(),
            set.flashcards.len(),
            set.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    /// Print a flashcard set in full.
    pub fn flashcards(set: &FlashcardSet) {
        Output::header(&set.title);
        Output::kv("Video", &set.subject_ref);
        if let Some(thumb) = &set.thumbnail {
            Output::kv("Thumbnail", thumb);
        }
        println!();
        for (i, card) in set.flashcards.iter().enumerate() {
            println!("  {} {}", style(format!("{:>3}.", i + 1)).cyan(), card.content);
        }
    }

    /// Print a job snapshot.
    pub fn job(job: &Job) {
        let status = match job.status {
            JobStatus::Pending => style(job.status.as_str()).yellow(),
            JobStatus::InProgress => style(job.status.as_str()).cyan(),
            JobStatus::Completed => style(job.status.as_str()).green(),
            JobStatus::Failed => style(job.status.as_str()).red(),
        };

        Output::kv("Job", &job.id);
        Output::kv("Status", &status.to_string());
        Output::kv("Video", job.payload.subject_ref());
        Output::kv("Owner", job.payload.owner_id());
        Output::kv("Attempts", &job.attempts.to_string());
        let age = (job.updated_at - job.created_at).num_seconds().max(0) as u64;
        Output::kv("Elapsed", &format_duration(age));

        match &job.result {
            Some(JobOutcome::Completed(r)) => Output::kv("Flashcards", &r.card_count.to_string()),
            Some(JobOutcome::Failed(f)) => {
                let stage = f.stage.as_deref().unwrap_or("-");
                Output::kv("Last error", &format!("[{} / {}] {}", stage, f.kind, preview(&f.message, 200)));
                if job.status == JobStatus::Pending {
                    Output::kv("Next attempt", &job.available_at.format("%H:%M:%S").to_string());
                }
            }
            None => {}
        }
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format duration in seconds to a human-readable string.
fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate content with ellipsis.
fn preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        format!("{}...", content.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("åäö line\nnext", 100), "åäö line next");
        assert_eq!(preview("åäöåäö", 3), "åäö...");
    }
}
