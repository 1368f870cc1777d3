//! CLI interface for Parley
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving experiment runs.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parley Dialogue Evaluation Engine
///
/// Generates conversations between a testee chatbot and a reference partner,
/// scores them with a battery of metrics, and stores the results per
/// experiment.
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate conversations and analyse them in one go
    Run {
        /// Testee agent ids, comma separated (defaults to the configured
        /// testees)
        #[arg(short, long)]
        testees: Option<String>,
    },

    /// Generate conversations without analysing them
    Generate {
        /// Testee agent ids, comma separated (defaults to the configured
        /// testees)
        #[arg(short, long)]
        testees: Option<String>,
    },

    /// Analyse previously generated runs from their transcripts
    Analyse {
        /// Run ids to analyse (defaults to every run in the experiment)
        run_ids: Vec<u32>,
    },

    /// Show analysed runs from the result database
    History {
        /// Number of runs to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Show experiment status and backend availability
    Status,
}
