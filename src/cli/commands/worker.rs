//! Worker command - process queued jobs until interrupted.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::queue::JobEvent;
use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Run the worker command.
pub async fn run_worker(workers: Option<usize>, mut settings: Settings) -> Result<()> {
    if let Some(n) = workers {
        settings.queue.workers = n.max(1);
    }
    preflight::check(Operation::Process, &settings)?;

    let worker_count = settings.queue.workers;
    let orchestrator = Orchestrator::with_workers(settings)?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => Output::info(&describe_event(&event)),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} job events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    orchestrator.start_workers()?;
    Output::success(&format!("Started {} worker(s)", worker_count));
    Output::info("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    let spinner = Output::spinner("Stopping workers...");
    orchestrator.shutdown().await;
    spinner.finish_and_clear();
    Output::success("Workers stopped. Running jobs were returned to the queue.");

    Ok(())
}

fn describe_event(event: &JobEvent) -> String {
    match event {
        JobEvent::Enqueued {
            job_id,
            subject_ref,
            ..
        } => format!("{} queued for {}", job_id, subject_ref),
        JobEvent::Started { job_id, attempt } => {
            format!("{} started (attempt {})", job_id, attempt)
        }
        JobEvent::Completed { job_id, card_count } => {
            format!("{} completed with {} flashcards", job_id, card_count)
        }
        JobEvent::RetryScheduled {
            job_id,
            attempt,
            available_at,
            failure,
        } => format!(
            "{} attempt {} failed ({}), retrying at {}",
            job_id,
            attempt,
            failure.message,
            available_at.format("%H:%M:%S")
        ),
        JobEvent::Failed { job_id, failure } => format!(
            "{} failed after {} attempt(s) in {}: {}",
            job_id,
            failure.attempt,
            failure.stage.as_deref().unwrap_or("queue"),
            failure.message
        ),
    }
}
