//! List, show and delete flashcard sets.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the list command.
pub async fn run_list(owner: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let sets = orchestrator.list_results(owner).await?;

    if sets.is_empty() {
        Output::info("No flashcards yet.");
        Output::info("Generate some with: jotta submit <youtube-url> --wait");
        return Ok(());
    }

    Output::header(&format!("Flashcard sets ({})", sets.len()));
    println!();
    for set in &sets {
        Output::set_summary(set);
    }
    println!();

    Ok(())
}

/// Run the show command.
pub async fn run_show(input: &str, owner: &str, json: bool, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let set = match orchestrator.get_result(input, owner).await {
        Ok(set) => set,
        Err(e) => {
            if let Some(job) = orchestrator.active_job(input, owner).await? {
                Output::info("Flashcards are still being generated:");
                Output::job(&job);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&set)?);
    } else {
        Output::flashcards(&set);
    }
    Ok(())
}

/// Run the delete command.
pub async fn run_delete(input: &str, owner: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    orchestrator.delete_result(input, owner).await?;
    Output::success("Flashcards deleted.");
    Ok(())
}
