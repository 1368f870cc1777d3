//! Agent Adapter Layer
//!
//! This module provides a common interface over the heterogeneous backends a
//! dialogue can be driven by: a human at the keyboard, a local
//! text-generation service, or a remotely hosted inference service. The
//! `ConvAgent` trait defines the capability contract that the conversation
//! engine consumes, so the engine never knows which backend produced a turn.
//!
//! Agents are constructed through the registry (`build_agent` /
//! `build_agents`), which maps string identifiers to backends and returns a
//! typed error for identifiers it does not know.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Config;

pub mod human;
pub mod local;
pub mod opener;
pub mod remote;

pub use human::HumanAgent;
pub use local::LocalGenAgent;
pub use opener::{OpenerGenerator, QuestionPool};
pub use remote::RemoteServiceAgent;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur during agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown agent id: {0}")]
    UnknownAgent(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Agent setup failed: {0}")]
    SetupFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Agent call timed out")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Agent {0} was reconstructed from a transcript and cannot act")]
    ReplayOnly(String),

    #[error("Input error: {0}")]
    Input(String),
}

/// Role of a conversation participant
///
/// `Testee` and `OtherAgent` own live turns; `Generator` and
/// `QuestionGenerator` appear only on synthetic opening messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// The agent under evaluation
    Testee,

    /// The fixed reference conversation partner
    #[serde(rename = "Other agent")]
    OtherAgent,

    /// Synthetic conversation-opener text generator
    #[serde(rename = "generator")]
    Generator,

    /// Interview-mode opening question source
    #[serde(rename = "question_generator")]
    QuestionGenerator,
}

impl AgentRole {
    /// Transcript spelling of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Testee => "Testee",
            AgentRole::OtherAgent => "Other agent",
            AgentRole::Generator => "generator",
            AgentRole::QuestionGenerator => "question_generator",
        }
    }

    /// Parse a role from its transcript spelling, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "testee" => Some(AgentRole::Testee),
            "other agent" | "other_agent" => Some(AgentRole::OtherAgent),
            "generator" => Some(AgentRole::Generator),
            "question_generator" => Some(AgentRole::QuestionGenerator),
            _ => None,
        }
    }

    /// True for the agent under evaluation
    pub fn is_testee(&self) -> bool {
        matches!(self, AgentRole::Testee)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capability contract for a conversation participant
///
/// `setup` and `shutdown` bracket an agent's use for one run and are
/// idempotent; the defaults are no-ops for backends with no lifecycle.
#[async_trait]
pub trait ConvAgent: Send + Sync {
    /// Identifier of this agent (model/image name, "human", ...)
    fn id(&self) -> &str;

    /// Role this agent plays in conversations
    fn role(&self) -> AgentRole;

    /// Produce the next reply given the stringified conversation history
    /// so far, oldest first.
    async fn act(&self, history: &[String]) -> Result<String>;

    /// Bring the backend online. Failure is fatal for the run.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Release the backend.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Placeholder agent attached to conversations reconstructed from a
/// persisted transcript. Carries only the original id and role; it has no
/// live generation capability.
#[derive(Debug, Clone)]
pub struct ReplayAgent {
    id: String,
    role: AgentRole,
}

impl ReplayAgent {
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[async_trait]
impl ConvAgent for ReplayAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn act(&self, _history: &[String]) -> Result<String> {
        Err(AgentError::ReplayOnly(self.id.clone()))
    }
}

/// Construct one agent from its string identifier.
///
/// Routing rules, in order:
/// 1. `"human"` → the keyboard-backed agent
/// 2. ids listed in `agents.local_ids` → the local generation backend
/// 3. ids listed in `agents.remote_ids`, or containing
///    `agents.remote_marker` → the remote inference backend
/// 4. anything else → `AgentError::UnknownAgent`
pub fn build_agent(id: &str, role: AgentRole, config: &Config) -> Result<Box<dyn ConvAgent>> {
    let id = id.trim().to_lowercase();
    if id.is_empty() {
        return Err(AgentError::UnknownAgent(id));
    }

    if id == "human" {
        return Ok(Box::new(HumanAgent::new(role)));
    }

    if config.agents.local_ids.iter().any(|known| *known == id) {
        return Ok(Box::new(LocalGenAgent::new(
            &id,
            role,
            &config.agents.local_backend,
        )));
    }

    if config.agents.remote_ids.iter().any(|known| *known == id)
        || id.contains(&config.agents.remote_marker)
    {
        return Ok(Box::new(RemoteServiceAgent::new(
            &id,
            role,
            &config.agents.remote_backend,
        )));
    }

    Err(AgentError::UnknownAgent(id))
}

/// Construct a roster of agents from a comma-separated identifier list.
///
/// Unlike the lenient behavior of earlier tooling, an unknown identifier
/// fails the whole roster so a typo cannot silently shrink an experiment.
pub fn build_agents(ids: &str, role: AgentRole, config: &Config) -> Result<Vec<Box<dyn ConvAgent>>> {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| build_agent(id, role, config))
        .collect()
}
