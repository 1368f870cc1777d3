//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - generate: Produce conversations and transcripts for each testee
//! - analyse: Score previously generated runs and export the results
//! - run: Generate then analyse in one go
//! - history: Show analysed runs from the result database
//! - status: Check the experiment directory and backend availability

use anyhow::{Context, Result};
use serde_json::json;

use crate::agent::{build_agent, build_agents, AgentRole};
use crate::analysis::AnalysisPipeline;
use crate::config::Config;
use crate::db::Database;
use crate::runs::{OpenerSource, RunTracker, Runs};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Generate conversations for each requested testee.
///
/// Every testee gets its own run: one transcript file, one configuration
/// record, `amount_convs` conversations. Returns the allocated run ids.
pub async fn handle_generate(
    testees: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<Vec<u32>> {
    let testee_ids = testees.unwrap_or_else(|| config.agents.testee_ids.clone());
    if testee_ids.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "No testee agents given. Pass --testees or set agents.testee_ids in config.toml"
        ));
    }

    let testee_agents = build_agents(&testee_ids, AgentRole::Testee, config)
        .context("Failed to build testee agents")?;
    let partner = build_agent(&config.agents.conv_partner_id, AgentRole::OtherAgent, config)
        .context("Failed to build conversation partner")?;
    let openers = OpenerSource::from_config(config)?;
    let tracker = RunTracker::new(config)?;

    let mut run_ids = Vec::with_capacity(testee_agents.len());
    for testee in &testee_agents {
        let (run_id, conversations) = tracker
            .generate(testee.as_ref(), partner.as_ref(), &openers, &config.experiment)
            .await
            .with_context(|| format!("Generation failed for testee '{}'", testee.id()))?;

        match format {
            OutputFormat::Text => {
                println!(
                    "✓ Run {} generated: {} conversations with '{}'",
                    run_id,
                    conversations.len(),
                    testee.id()
                );
            }
            OutputFormat::Json => {
                let output = json!({
                    "run_id": run_id,
                    "testee": testee.id(),
                    "conversations": conversations.len(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        run_ids.push(run_id);
    }

    Ok(run_ids)
}

/// Analyse runs from their transcripts and export the results.
///
/// With no explicit ids, every run found in the experiment directory is
/// analysed. Each run's metadata is recorded (or its test timestamp
/// refreshed) before the analyzer reports are exported.
pub async fn handle_analyse(
    run_ids: Vec<u32>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let tracker = RunTracker::new(config)?;

    let run_ids = if run_ids.is_empty() {
        tracker.existing_run_ids()?
    } else {
        run_ids
    };
    if run_ids.is_empty() {
        return Err(anyhow::anyhow!(
            "No runs to analyse in {}",
            tracker.dir().display()
        ));
    }

    let records = tracker
        .replay(&run_ids)
        .context("Failed to replay runs from transcripts")?;

    let mut runs = Runs::new();
    for record in &records {
        runs.insert(record.run_id, record.conversations.clone());
    }

    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open result database")?;
    let store = database.results();

    for record in &records {
        store
            .record_run(record.run_id, &record.config)
            .await
            .with_context(|| format!("Failed to record run {}", record.run_id))?;
    }

    let pipeline = AnalysisPipeline::standard(config)?;
    let reports = pipeline.analyse_all(&runs).await;

    let mut exported = Vec::new();
    for report in &reports {
        store.export(report).await?;
        exported.push(report.analyzer_id);
    }

    database.close().await?;

    match format {
        OutputFormat::Text => {
            println!(
                "✓ Analysed {} run(s): {}",
                run_ids.len(),
                run_ids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("  Exported analyzers: {}", exported.join(", "));
        }
        OutputFormat::Json => {
            let output = json!({
                "run_ids": run_ids,
                "analyzers": exported,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Generate then analyse in one go.
pub async fn handle_run(
    testees: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let run_ids = handle_generate(testees, config, format).await?;
    handle_analyse(run_ids, config, format).await
}

/// Show analysed runs from the result database.
pub async fn handle_history(limit: u32, config: &Config, format: OutputFormat) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open result database")?;
    let runs = database.results().list_runs(limit).await?;
    database.close().await?;

    match format {
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No analysed runs");
                return Ok(());
            }

            println!("Run History (last {} runs):", limit);
            println!();
            for run in &runs {
                println!("Run {}", run.run_id);
                println!("  Testee: {}", run.testee_id);
                println!("  Partner: {}", run.conv_partner_id);
                println!(
                    "  Conversations: {} x {} turns each",
                    run.amount_convs, run.conv_length
                );
                println!("  Generated: {}", run.date_time_generated);
                println!("  Last tested: {}", run.date_time_tested);
                println!();
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = runs
                .iter()
                .map(|run| {
                    json!({
                        "run_id": run.run_id,
                        "testee_id": run.testee_id,
                        "conv_partner_id": run.conv_partner_id,
                        "conv_length": run.conv_length,
                        "amount_convs": run.amount_convs,
                        "conv_starter": run.conv_starter,
                        "date_time_generated": run.date_time_generated,
                        "date_time_tested": run.date_time_tested,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show experiment status: storage paths, existing runs, and whether the
/// scoring backends answer at all.
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let tracker = RunTracker::new(config)?;
    let run_ids = tracker.existing_run_ids()?;
    let db_exists = config.database_path().exists();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(3))
        .build()
        .context("Failed to build HTTP client")?;
    let generation_up = client
        .get(&config.agents.local_backend.base_url)
        .send()
        .await
        .is_ok();
    let toxicity_up = client
        .get(&config.scoring.toxicity_url)
        .send()
        .await
        .is_ok();
    let coherence_up = client
        .get(&config.scoring.coherence_url)
        .send()
        .await
        .is_ok();

    match format {
        OutputFormat::Text => {
            println!("Experiment: {}", config.experiment.id);
            println!("  Directory: {}", tracker.dir().display());
            println!("  Generated runs: {}", run_ids.len());
            println!(
                "  Result database: {}",
                if db_exists { "present" } else { "not created yet" }
            );
            println!(
                "  Generation backend: {}",
                if generation_up { "reachable" } else { "unreachable" }
            );
            println!(
                "  Toxicity service: {}",
                if toxicity_up { "reachable" } else { "unreachable" }
            );
            println!(
                "  Coherence service: {}",
                if coherence_up { "reachable" } else { "unreachable" }
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "experiment": config.experiment.id,
                "directory": tracker.dir().display().to_string(),
                "generated_runs": run_ids,
                "database_present": db_exists,
                "generation_backend_reachable": generation_up,
                "toxicity_service_reachable": toxicity_up,
                "coherence_service_reachable": coherence_up,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
