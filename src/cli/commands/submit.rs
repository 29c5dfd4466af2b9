//! Submit and status commands.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::JottaError;
use crate::orchestrator::Orchestrator;
use crate::queue::{Job, JobStatus};
use anyhow::Result;
use std::time::Duration;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Run the submit command.
pub async fn run_submit(
    input: &str,
    owner: &str,
    wait: bool,
    local: bool,
    settings: Settings,
) -> Result<()> {
    let orchestrator = if local {
        preflight::check(Operation::Process, &settings)?;
        let orchestrator = Orchestrator::with_workers(settings)?;
        orchestrator.start_workers()?;
        orchestrator
    } else {
        Orchestrator::new(settings)?
    };

    let job = match orchestrator.submit(input, owner).await {
        Ok(job) => job,
        Err(e @ JottaError::AlreadyExists(_)) => {
            match orchestrator.active_job(input, owner).await? {
                Some(active) => {
                    Output::warning("A job for this video is already queued:");
                    Output::job(&active);
                }
                None => Output::info("Flashcards already exist. Use `jotta show` to print them."),
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    Output::success(&format!("Queued job {}", job.id));
    if !wait && !local {
        Output::info(&format!("Check progress with: jotta status {}", job.id));
        return Ok(());
    }

    let outcome = tokio::select! {
        job = wait_for(&orchestrator, &job.id) => job,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.shutdown().await;
            Output::warning("Interrupted. The job stays queued.");
            return Ok(());
        }
    };
    orchestrator.shutdown().await;
    let job = outcome?;

    match job.status {
        JobStatus::Completed => {
            let set = orchestrator.get_result(input, owner).await?;
            Output::flashcards(&set);
            Ok(())
        }
        _ => {
            Output::job(&job);
            anyhow::bail!("Job {} failed", job.id)
        }
    }
}

/// Poll a job until it reaches a terminal state.
async fn wait_for(orchestrator: &Orchestrator, job_id: &str) -> crate::Result<Job> {
    let spinner = Output::spinner("Waiting for a worker...");
    loop {
        let job = orchestrator.job_status(job_id).await?;
        if job.status.is_terminal() {
            spinner.finish_and_clear();
            return Ok(job);
        }
        spinner.set_message(match job.status {
            JobStatus::InProgress => format!("Generating flashcards (attempt {})...", job.attempts),
            _ if job.attempts > 0 => format!("Waiting to retry (attempt {} failed)...", job.attempts),
            _ => "Waiting for a worker...".to_string(),
        });
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

/// Run the status command.
pub async fn run_status(job_id: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let job = orchestrator.job_status(job_id).await?;
    Output::header("Job");
    Output::job(&job);
    Ok(())
}
