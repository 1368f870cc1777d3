//! Engine error types
//!
//! One error enum at the crate seam. Fatal conditions (bad configuration,
//! unknown agents, missing runs) surface here; recoverable per-analyzer
//! and per-conversation conditions are handled where they occur.

use thiserror::Error;

use crate::agent::AgentError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration loading or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transcript file could not be parsed back into conversations
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// The run id has no recorded configuration or transcript
    #[error("Run {0} not found")]
    RunNotFound(u32),

    /// An agent call failed
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON record could not be read or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
