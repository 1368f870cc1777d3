//! Synthetic conversation openers
//!
//! Two opener sources exist: `OpenerGenerator` samples a conversation
//! starter from a pool and lets the local generation backend extend it into
//! a full opening line (role `generator`), and `QuestionPool` samples a
//! fixed interview question (role `question_generator`). Which one a
//! conversation uses is decided by the start policy.

use rand::seq::SliceRandom;

use super::{AgentError, AgentRole, ConvAgent, LocalGenAgent, Result};
use crate::config::Config;
use crate::error::EngineError;

const DEFAULT_STARTERS: &str = include_str!("../../data/conv-starters.txt");
const DEFAULT_QUESTIONS: &str = include_str!("../../data/questions.txt");

/// Split a pool file into non-empty lines.
fn pool_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load a pool from a configured path, or fall back to the embedded default.
fn load_pool(
    path: Option<&std::path::Path>,
    default: &str,
    what: &str,
) -> std::result::Result<Vec<String>, EngineError> {
    let lines = match path {
        Some(p) => pool_lines(&std::fs::read_to_string(p)?),
        None => pool_lines(default),
    };
    if lines.is_empty() {
        return Err(EngineError::Config(format!("{} pool is empty", what)));
    }
    Ok(lines)
}

/// Generates randomized conversation-opening messages
///
/// Samples one starter line and asks the generation backend to continue it;
/// the result is flattened to a single line before use.
pub struct OpenerGenerator {
    starters: Vec<String>,
    generator: LocalGenAgent,
}

impl OpenerGenerator {
    pub fn new(starters: Vec<String>, generator: LocalGenAgent) -> Self {
        Self {
            starters,
            generator,
        }
    }

    /// Build from config: starter pool from the configured path (or the
    /// embedded default) and a generator-role agent on the local backend.
    pub fn from_config(config: &Config) -> std::result::Result<Self, EngineError> {
        let starters = load_pool(
            config.lexicon.starters.as_deref(),
            DEFAULT_STARTERS,
            "conversation starter",
        )?;
        let generator = LocalGenAgent::new(
            "generator",
            AgentRole::Generator,
            &config.agents.local_backend,
        );
        Ok(Self::new(starters, generator))
    }

    /// Produce one opening line.
    pub async fn generate(&self) -> Result<String> {
        let starter = self
            .starters
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| AgentError::Input("empty starter pool".to_string()))?
            .clone();

        let generated = self.generator.act(&[starter]).await?;
        Ok(flatten_lines(&generated))
    }
}

/// Fixed pool of interview-mode opening questions
pub struct QuestionPool {
    questions: Vec<String>,
}

impl QuestionPool {
    pub fn new(questions: Vec<String>) -> Self {
        Self { questions }
    }

    /// Build from the configured question file, or the embedded default.
    pub fn from_config(config: &Config) -> std::result::Result<Self, EngineError> {
        let questions = load_pool(
            config.lexicon.questions.as_deref(),
            DEFAULT_QUESTIONS,
            "interview question",
        )?;
        Ok(Self::new(questions))
    }

    /// Draw one question at random.
    pub fn sample(&self) -> Result<String> {
        self.questions
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| AgentError::Input("empty question pool".to_string()))
    }
}

/// Collapse generated multi-line text into one transcript-safe line.
fn flatten_lines(text: &str) -> String {
    text.replace("\n\n", "\n").replace('\n', " ")
}
