//! Parley Engine Library
//!
//! This library provides the core functionality of the Parley dialogue
//! evaluation engine. It is used by both the main binary and integration
//! tests.

/// Configuration management module
pub mod config;

/// Engine error types
pub mod error;

/// Conversational agent abstraction layer
pub mod agent;

/// Conversation model and turn-taking engine
pub mod conversation;

/// Run tracking and transcript persistence
pub mod runs;

/// Metrics pipeline
pub mod analysis;

/// Database persistence module
pub mod db;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use error::EngineError;
