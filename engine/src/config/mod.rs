//! Configuration management
//!
//! This module handles loading, validation, and management of the Parley
//! configuration. Configuration is stored in TOML format at
//! ~/.parley/config.toml and is loaded once at startup into one immutable
//! `Config` value that is passed explicitly into the run tracker, the
//! conversation engine, and the analysis pipeline.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, experiment data directory
//! - **experiment**: Experiment id and conversation policy (length, count,
//!   opener and starter settings, per-turn timeout)
//! - **agents**: Agent registry rules and backend endpoints
//! - **scoring**: Toxicity / coherence scoring service endpoints
//! - **lexicon**: Paths to the frequency list, contraction table, interview
//!   question pool and conversation starter pool (embedded defaults are used
//!   when a path is not set)
//!
//! # Path Expansion
//!
//! The configuration system automatically expands ~ to the user's home
//! directory and creates the data directory if it doesn't exist.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Represents the complete Parley configuration loaded from
/// ~/.parley/config.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Experiment identity and conversation policy
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Agent registry and backend endpoints
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Scoring service endpoints
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// External lexical inputs
    #[serde(default)]
    pub lexicon: LexiconConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Experiment data directory (supports ~ expansion). Holds one
    /// subdirectory per experiment with transcripts, the run configuration
    /// record, and the result database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Experiment identity and conversation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment identifier. All runs sharing it share one storage location.
    #[serde(default = "default_experiment_id")]
    pub id: String,

    /// How many replies each participant produces per conversation
    #[serde(default = "default_conv_length")]
    pub conv_length: u32,

    /// How many conversations to generate per testee
    #[serde(default = "default_amount_convs")]
    pub amount_convs: u32,

    /// Who takes the first live turn: "testee", "conv_partner", or "" for an
    /// unbiased coin flip
    #[serde(default)]
    pub conv_starter: String,

    /// Open each conversation with a generated synthetic message
    #[serde(default = "default_true")]
    pub random_conv_start: bool,

    /// Open each conversation with a random interview question instead; the
    /// conversation partner then takes the first live turn
    #[serde(default)]
    pub interview_mode: bool,

    /// Per-turn timeout for agent calls, in seconds
    #[serde(default = "default_act_timeout")]
    pub act_timeout_secs: u64,
}

/// Agent registry rules and backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Default conversation partner agent id
    #[serde(default = "default_conv_partner_id")]
    pub conv_partner_id: String,

    /// Default testee agent ids, comma separated
    #[serde(default)]
    pub testee_ids: String,

    /// Agent ids served by the local generation backend
    #[serde(default = "default_local_ids")]
    pub local_ids: Vec<String>,

    /// Agent ids served by the remote inference backend
    #[serde(default)]
    pub remote_ids: Vec<String>,

    /// Substring that routes an otherwise unknown agent id to the remote
    /// backend (the remote service is deployed under per-model image names)
    #[serde(default = "default_remote_marker")]
    pub remote_marker: String,

    /// Local text-generation backend
    #[serde(default)]
    pub local_backend: LocalBackendConfig,

    /// Remote inference backend
    #[serde(default)]
    pub remote_backend: RemoteBackendConfig,
}

/// Local text-generation backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Base URL for the generation API
    #[serde(default = "default_local_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_local_model")]
    pub model: String,

    /// How many trailing history entries are sent per request
    #[serde(default = "default_local_chat_memory")]
    pub chat_memory: usize,
}

/// Remote inference backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    /// Inference endpoint URL
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    /// How many trailing history entries are sent per request
    #[serde(default = "default_remote_chat_memory")]
    pub chat_memory: usize,

    /// Container runtime binary used by setup/shutdown ("docker", "podman")
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Host port the service container publishes
    #[serde(default = "default_remote_port")]
    pub port: u16,

    /// Seconds to wait after container start before sending requests
    #[serde(default = "default_ready_delay")]
    pub ready_delay_secs: u64,

    /// Seconds to wait after killing the container
    #[serde(default = "default_stop_delay")]
    pub stop_delay_secs: u64,
}

/// Scoring service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Toxicity classifier endpoint
    #[serde(default = "default_toxicity_url")]
    pub toxicity_url: String,

    /// Next-message-plausibility endpoint
    #[serde(default = "default_coherence_url")]
    pub coherence_url: String,

    /// Pairs per coherence request
    #[serde(default = "default_scoring_batch_size")]
    pub batch_size: usize,
}

/// Paths to external lexical inputs. `None` falls back to the data files
/// embedded in the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexiconConfig {
    /// Frequency-ranked word list, one `word<TAB>count` line per word,
    /// ordered most frequent first
    #[serde(default)]
    pub frequency_list: Option<PathBuf>,

    /// Contraction table, one `contraction<TAB>expansion` line per entry
    #[serde(default)]
    pub contractions: Option<PathBuf>,

    /// Interview question pool, one question per line
    #[serde(default)]
    pub questions: Option<PathBuf>,

    /// Conversation starter pool, one starter per line
    #[serde(default)]
    pub starters: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.parley/data")
}

fn default_experiment_id() -> String {
    "default".to_string()
}

fn default_conv_length() -> u32 {
    2
}

fn default_amount_convs() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_act_timeout() -> u64 {
    300
}

fn default_conv_partner_id() -> String {
    "blenderbot90m".to_string()
}

fn default_local_ids() -> Vec<String> {
    vec!["blenderbot90m".to_string(), "blenderbot400m".to_string()]
}

fn default_remote_marker() -> String {
    "emely".to_string()
}

fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_local_chat_memory() -> usize {
    3
}

fn default_remote_base_url() -> String {
    "http://localhost:8080/inference".to_string()
}

fn default_remote_chat_memory() -> usize {
    6
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

fn default_remote_port() -> u16 {
    8080
}

fn default_ready_delay() -> u64 {
    8
}

fn default_stop_delay() -> u64 {
    5
}

fn default_toxicity_url() -> String {
    "http://localhost:9100/score".to_string()
}

fn default_coherence_url() -> String {
    "http://localhost:9101/nsp".to_string()
}

fn default_scoring_batch_size() -> usize {
    100
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            id: default_experiment_id(),
            conv_length: default_conv_length(),
            amount_convs: default_amount_convs(),
            conv_starter: String::new(),
            random_conv_start: true,
            interview_mode: false,
            act_timeout_secs: default_act_timeout(),
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            conv_partner_id: default_conv_partner_id(),
            testee_ids: String::new(),
            local_ids: default_local_ids(),
            remote_ids: Vec::new(),
            remote_marker: default_remote_marker(),
            local_backend: LocalBackendConfig::default(),
            remote_backend: RemoteBackendConfig::default(),
        }
    }
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_local_base_url(),
            model: default_local_model(),
            chat_memory: default_local_chat_memory(),
        }
    }
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            chat_memory: default_remote_chat_memory(),
            container_runtime: default_container_runtime(),
            port: default_remote_port(),
            ready_delay_secs: default_ready_delay(),
            stop_delay_secs: default_stop_delay(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            toxicity_url: default_toxicity_url(),
            coherence_url: default_coherence_url(),
            batch_size: default_scoring_batch_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            experiment: ExperimentConfig::default(),
            agents: AgentsConfig::default(),
            scoring: ScoringConfig::default(),
            lexicon: LexiconConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating a default
    /// config file on first use.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save it to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.parley/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".parley").join("config.toml"))
    }

    /// Directory holding this experiment's transcripts, run configuration
    /// record, and result database.
    pub fn experiment_dir(&self) -> PathBuf {
        self.core.data_dir.join(&self.experiment.id)
    }

    /// Path of this experiment's result database.
    pub fn database_path(&self) -> PathBuf {
        self.experiment_dir().join("results.sqlite")
    }

    /// Validate and process configuration
    ///
    /// Validates field values, expands ~ in the data directory, and creates
    /// the data directory if it doesn't exist.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.experiment.id.is_empty() || self.experiment.id.contains(std::path::is_separator) {
            return Err(EngineError::Config(format!(
                "Invalid experiment id '{}'",
                self.experiment.id
            )));
        }

        if self.experiment.conv_length == 0 {
            return Err(EngineError::Config(
                "conv_length must be at least 1".to_string(),
            ));
        }

        if self.experiment.amount_convs == 0 {
            return Err(EngineError::Config(
                "amount_convs must be at least 1".to_string(),
            ));
        }

        let starter = self.experiment.conv_starter.to_lowercase();
        if !starter.is_empty() && starter != "testee" && starter != "conv_partner" {
            return Err(EngineError::Config(format!(
                "Invalid conv_starter '{}'. Must be 'testee', 'conv_partner', or empty",
                self.experiment.conv_starter
            )));
        }

        if self.scoring.batch_size == 0 {
            return Err(EngineError::Config(
                "scoring batch_size must be at least 1".to_string(),
            ));
        }

        self.core.data_dir = expand_tilde(&self.core.data_dir)?;
        fs::create_dir_all(&self.core.data_dir)
            .map_err(|e| EngineError::Config(format!("Failed to create data directory: {}", e)))?;

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> Result<PathBuf, EngineError> {
    let Some(s) = path.to_str() else {
        return Ok(path.to_path_buf());
    };

    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert_eq!(config.experiment.conv_length, 2);
        assert!(config.experiment.random_conv_start);
        assert!(!config.experiment.interview_mode);
        assert_eq!(config.scoring.batch_size, 100);
    }

    #[test]
    fn parse_round_trip() {
        let config = Config::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.experiment.id, config.experiment.id);
        assert_eq!(parsed.agents.conv_partner_id, config.agents.conv_partner_id);
        assert_eq!(parsed.scoring.toxicity_url, config.scoring.toxicity_url);
    }

    #[test]
    fn rejects_bad_conv_starter() {
        let mut config = Config::default();
        config.core.data_dir = std::env::temp_dir().join("parley-config-test");
        config.experiment.conv_starter = "moderator".to_string();
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn rejects_zero_length() {
        let mut config = Config::default();
        config.core.data_dir = std::env::temp_dir().join("parley-config-test");
        config.experiment.conv_length = 0;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn experiment_paths_derive_from_id() {
        let mut config = Config::default();
        config.core.data_dir = PathBuf::from("/tmp/parley");
        config.experiment.id = "pilot".to_string();
        assert_eq!(config.experiment_dir(), PathBuf::from("/tmp/parley/pilot"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/parley/pilot/results.sqlite")
        );
    }
}
