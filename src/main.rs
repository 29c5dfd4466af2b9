//! Jotta CLI entry point.

use anyhow::Result;
use clap::Parser;
use jotta::cli::{commands, Cli, Commands};
use jotta::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&Settings::expand_path(path)))?,
        None => Settings::load()?,
    };

    // Initialize logging; -v flags win over general.log_level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("jotta={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    let owner = cli.owner.as_str();

    // Execute command
    match &cli.command {
        Commands::Doctor => {
            commands::run_doctor(&settings, cli.config.as_deref())?;
        }

        Commands::Submit { input, wait, local } => {
            commands::run_submit(input, owner, *wait, *local, settings).await?;
        }

        Commands::Status { job_id } => {
            commands::run_status(job_id, settings).await?;
        }

        Commands::List => {
            commands::run_list(owner, settings).await?;
        }

        Commands::Show { input, json } => {
            commands::run_show(input, owner, *json, settings).await?;
        }

        Commands::Delete { input } => {
            commands::run_delete(input, owner, settings).await?;
        }

        Commands::Worker { workers } => {
            commands::run_worker(*workers, settings).await?;
        }

        Commands::Serve {
            host,
            port,
            no_workers,
        } => {
            commands::run_serve(host.clone(), *port, *no_workers, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, cli.config.as_deref(), settings)?;
        }
    }

    Ok(())
}
