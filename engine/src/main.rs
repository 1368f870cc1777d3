// Parley Dialogue Evaluation Engine
// Main entry point for the parley binary

use clap::Parser;
use parley_engine::cli::{Cli, Command};
use parley_engine::config::Config;
use parley_engine::handlers::{
    handle_analyse, handle_generate, handle_history, handle_run, handle_status, OutputFormat,
};
use parley_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    tracing::info!("Parley Engine v{}", env!("CARGO_PKG_VERSION"));

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Re-initialize telemetry with the CLI or config-driven log level
    // (only takes effect if RUST_LOG env var is not set)
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    // Handle commands
    match cli.command {
        Command::Run { testees } => {
            tracing::info!(experiment = %config.experiment.id, "Running full experiment");
            handle_run(testees, &config, format).await
        }

        Command::Generate { testees } => {
            tracing::info!(experiment = %config.experiment.id, "Generating conversations");
            handle_generate(testees, &config, format).await.map(|_| ())
        }

        Command::Analyse { run_ids } => {
            tracing::info!(experiment = %config.experiment.id, "Analysing runs");
            handle_analyse(run_ids, &config, format).await
        }

        Command::History { limit } => {
            tracing::info!("Showing last {} runs", limit);
            handle_history(limit, &config, format).await
        }

        Command::Status => {
            tracing::info!("Checking experiment status...");
            handle_status(&config, format).await
        }
    }
}
