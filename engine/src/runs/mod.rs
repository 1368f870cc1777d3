//! Run tracking and persistence
//!
//! A run is one generation session for one testee: `amount_convs`
//! conversations logged to `run_<id>.txt` inside the experiment directory,
//! with the generation settings recorded once in `experiment_config.json`.
//! Run ids are allocated by scanning the directory for existing transcript
//! files, so numbering stays monotonic across process restarts and ids are
//! never reused.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::{AgentRole, ConvAgent, OpenerGenerator, QuestionPool, ReplayAgent};
use crate::config::{Config, ExperimentConfig};
use crate::conversation::{
    parse_transcript, Conversation, ConversationEngine, ConversationPolicy, Message, StarterPolicy,
    TranscriptWriter,
};
use crate::error::EngineError;

const CONFIG_RECORD_FILE: &str = "experiment_config.json";

/// Conversations grouped by run id, the unit the analysis pipeline folds
/// over. Ordered so reports and exports are deterministic.
pub type Runs = BTreeMap<u32, Vec<Conversation>>;

/// The generation settings of one run. Written once when the run is
/// created and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub testee_id: String,
    pub conv_partner_id: String,
    pub conv_length: u32,
    pub amount_convs: u32,
    pub conv_starter: String,
    pub random_conv_start: bool,
    pub date_time_generated: String,
}

impl RunConfig {
    fn from_experiment(experiment: &ExperimentConfig, testee_id: &str, partner_id: &str) -> Self {
        Self {
            testee_id: testee_id.to_string(),
            conv_partner_id: partner_id.to_string(),
            conv_length: experiment.conv_length,
            amount_convs: experiment.amount_convs,
            conv_starter: experiment.conv_starter.clone(),
            random_conv_start: experiment.random_conv_start,
            date_time_generated: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// How conversation openers are produced for a run.
pub enum OpenerSource {
    /// No synthetic opener, the first live turn opens the conversation
    None,

    /// Extend a random starter line with the local generation backend
    Generator(OpenerGenerator),

    /// Sample a fixed interview question; the partner answers first
    Questions(QuestionPool),
}

impl OpenerSource {
    /// Build the opener source the experiment settings call for.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        if config.experiment.interview_mode {
            Ok(OpenerSource::Questions(QuestionPool::from_config(config)?))
        } else if config.experiment.random_conv_start {
            Ok(OpenerSource::Generator(OpenerGenerator::from_config(
                config,
            )?))
        } else {
            Ok(OpenerSource::None)
        }
    }

    async fn next_opener(&self) -> Result<Option<Message>, EngineError> {
        match self {
            OpenerSource::None => Ok(None),
            OpenerSource::Generator(generator) => {
                let text = generator.generate().await?;
                Ok(Some(Message::new(
                    text,
                    AgentRole::Generator.as_str(),
                    AgentRole::Generator,
                )))
            }
            OpenerSource::Questions(pool) => {
                let text = pool.sample()?;
                Ok(Some(Message::new(
                    text,
                    AgentRole::QuestionGenerator.as_str(),
                    AgentRole::QuestionGenerator,
                )))
            }
        }
    }
}

/// One reconstructed run: its recorded settings, its conversations, and
/// placeholder agents carrying the original participant identities.
pub struct RunRecord {
    pub run_id: u32,
    pub config: RunConfig,
    pub conversations: Vec<Conversation>,
    pub testee: ReplayAgent,
    pub partner: ReplayAgent,
}

/// Owns one experiment directory: run id allocation, transcripts, and the
/// run configuration record.
pub struct RunTracker {
    dir: PathBuf,
}

impl RunTracker {
    /// Open the tracker for the configured experiment, creating its
    /// directory on first use.
    pub fn new(config: &Config) -> Result<Self, EngineError> {
        Self::open(config.experiment_dir())
    }

    pub fn open(dir: PathBuf) -> Result<Self, EngineError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn transcript_path(&self, run_id: u32) -> PathBuf {
        self.dir.join(format!("run_{}.txt", run_id))
    }

    fn config_record_path(&self) -> PathBuf {
        self.dir.join(CONFIG_RECORD_FILE)
    }

    /// Run ids with a transcript on disk, ascending.
    pub fn existing_run_ids(&self) -> Result<Vec<u32>, EngineError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix("run_")
                .and_then(|rest| rest.strip_suffix(".txt"))
                .and_then(|nbr| nbr.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Next free run id: 1 on an empty directory, otherwise one past the
    /// highest transcript found. Recovered by scan, so numbering survives
    /// process restarts.
    pub fn allocate_run_id(&self) -> Result<u32, EngineError> {
        let ids = self.existing_run_ids()?;
        Ok(ids.last().map_or(1, |max| max + 1))
    }

    /// Record a run's settings in `experiment_config.json`, exactly once.
    /// An id that is already recorded keeps its original record untouched.
    pub fn record_config(&self, run_id: u32, config: &RunConfig) -> Result<(), EngineError> {
        let mut records = self.load_config_records()?;
        let key = run_id.to_string();
        if records.contains_key(&key) {
            warn!(run_id, "run configuration already recorded, keeping original");
            return Ok(());
        }
        records.insert(key, config.clone());
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(self.config_record_path(), json)?;
        Ok(())
    }

    /// The recorded settings of one run.
    pub fn load_config(&self, run_id: u32) -> Result<RunConfig, EngineError> {
        self.load_config_records()?
            .remove(&run_id.to_string())
            .ok_or(EngineError::RunNotFound(run_id))
    }

    fn load_config_records(&self) -> Result<BTreeMap<String, RunConfig>, EngineError> {
        let path = self.config_record_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Generate one run: set the testee up, persist the run configuration,
    /// drive the configured number of conversations through the engine,
    /// then shut the testee down. Setup failure aborts before any state is
    /// written; a conversation error surfaces to the caller after shutdown.
    pub async fn generate(
        &self,
        testee: &dyn ConvAgent,
        partner: &dyn ConvAgent,
        openers: &OpenerSource,
        experiment: &ExperimentConfig,
    ) -> Result<(u32, Vec<Conversation>), EngineError> {
        testee.setup().await?;

        let result = self
            .generate_conversations(testee, partner, openers, experiment)
            .await;

        if let Err(e) = testee.shutdown().await {
            warn!(agent = testee.id(), error = %e, "testee shutdown failed");
        }

        result
    }

    async fn generate_conversations(
        &self,
        testee: &dyn ConvAgent,
        partner: &dyn ConvAgent,
        openers: &OpenerSource,
        experiment: &ExperimentConfig,
    ) -> Result<(u32, Vec<Conversation>), EngineError> {
        let run_id = self.allocate_run_id()?;
        let run_config = RunConfig::from_experiment(experiment, testee.id(), partner.id());
        self.record_config(run_id, &run_config)?;

        let policy = ConversationPolicy {
            conv_length: experiment.conv_length,
            random_conv_start: experiment.random_conv_start,
            interview_mode: experiment.interview_mode,
            starter: StarterPolicy::parse(&experiment.conv_starter)?,
            act_timeout: Duration::from_secs(experiment.act_timeout_secs),
        };
        let engine = ConversationEngine::new(testee, partner, policy);
        let mut writer = TranscriptWriter::append(&self.transcript_path(run_id))?;

        let mut conversations = Vec::with_capacity(experiment.amount_convs as usize);
        for conv_nbr in 1..=experiment.amount_convs {
            info!(run_id, conv_nbr, testee = testee.id(), "generating conversation");
            let opener = openers.next_opener().await?;
            let conv = engine.run(opener, &mut writer).await?;
            conversations.push(conv);
        }

        info!(
            run_id,
            conversations = conversations.len(),
            "run generation complete"
        );
        Ok((run_id, conversations))
    }

    /// Reconstruct persisted runs from their transcripts and recorded
    /// settings. Participants come back as replay placeholders carrying the
    /// original ids and roles; the messages are injected, not re-generated.
    pub fn replay(&self, run_ids: &[u32]) -> Result<Vec<RunRecord>, EngineError> {
        let mut records = Vec::with_capacity(run_ids.len());
        for &run_id in run_ids {
            let config = self.load_config(run_id)?;
            let path = self.transcript_path(run_id);
            if !path.exists() {
                return Err(EngineError::RunNotFound(run_id));
            }
            let contents = fs::read_to_string(&path)?;
            let conversations =
                parse_transcript(&contents, &config.testee_id, &config.conv_partner_id)?;
            info!(
                run_id,
                conversations = conversations.len(),
                "replayed run from transcript"
            );
            records.push(RunRecord {
                run_id,
                testee: ReplayAgent::new(&config.testee_id, AgentRole::Testee),
                partner: ReplayAgent::new(&config.conv_partner_id, AgentRole::OtherAgent),
                config,
                conversations,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EchoAgent {
        id: String,
        role: AgentRole,
    }

    #[async_trait]
    impl ConvAgent for EchoAgent {
        fn id(&self) -> &str {
            &self.id
        }
        fn role(&self) -> AgentRole {
            self.role
        }
        async fn act(&self, history: &[String]) -> crate::agent::Result<String> {
            Ok(format!("{} says turn {}", self.id, history.len()))
        }
    }

    fn agents() -> (EchoAgent, EchoAgent) {
        (
            EchoAgent {
                id: "testee-model".to_string(),
                role: AgentRole::Testee,
            },
            EchoAgent {
                id: "partner-model".to_string(),
                role: AgentRole::OtherAgent,
            },
        )
    }

    fn experiment() -> ExperimentConfig {
        ExperimentConfig {
            id: "test".to_string(),
            conv_length: 2,
            amount_convs: 2,
            conv_starter: "testee".to_string(),
            random_conv_start: false,
            interview_mode: false,
            act_timeout_secs: 5,
        }
    }

    #[test]
    fn run_ids_start_at_one_and_stay_monotonic() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(tracker.allocate_run_id().unwrap(), 1);

        fs::write(dir.path().join("run_1.txt"), "").unwrap();
        fs::write(dir.path().join("run_7.txt"), "").unwrap();
        assert_eq!(tracker.allocate_run_id().unwrap(), 8);
    }

    #[test]
    fn run_id_scan_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join("run_3.txt"), "").unwrap();
        fs::write(dir.path().join("experiment_config.json"), "{}").unwrap();
        fs::write(dir.path().join("results.sqlite"), "").unwrap();
        fs::write(dir.path().join("run_notanumber.txt"), "").unwrap();
        assert_eq!(tracker.allocate_run_id().unwrap(), 4);
    }

    #[test]
    fn config_record_is_write_once() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();

        let mut config = RunConfig::from_experiment(&experiment(), "t", "p");
        config.date_time_generated = "2026-01-01 00:00:00".to_string();
        tracker.record_config(4, &config).unwrap();

        let mut overwrite = config.clone();
        overwrite.testee_id = "someone-else".to_string();
        tracker.record_config(4, &overwrite).unwrap();

        let loaded = tracker.load_config(4).unwrap();
        assert_eq!(loaded.testee_id, "t");
        assert_eq!(loaded.date_time_generated, "2026-01-01 00:00:00");
    }

    #[test]
    fn missing_run_config_is_run_not_found() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            tracker.load_config(9).unwrap_err(),
            EngineError::RunNotFound(9)
        ));
    }

    #[tokio::test]
    async fn generate_writes_transcript_and_config() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        let (testee, partner) = agents();

        let (run_id, conversations) = tracker
            .generate(&testee, &partner, &OpenerSource::None, &experiment())
            .await
            .unwrap();

        assert_eq!(run_id, 1);
        assert_eq!(conversations.len(), 2);
        assert!(dir.path().join("run_1.txt").exists());
        let loaded = tracker.load_config(1).unwrap();
        assert_eq!(loaded.testee_id, "testee-model");
        assert_eq!(loaded.conv_length, 2);
    }

    #[tokio::test]
    async fn repeated_generate_never_reuses_ids() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        let (testee, partner) = agents();

        let (first, _) = tracker
            .generate(&testee, &partner, &OpenerSource::None, &experiment())
            .await
            .unwrap();
        let (second, _) = tracker
            .generate(&testee, &partner, &OpenerSource::None, &experiment())
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);

        // A fresh tracker over the same directory resumes after the highest
        // existing id.
        let resumed = RunTracker::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(resumed.allocate_run_id().unwrap(), 3);
    }

    #[tokio::test]
    async fn replay_reconstructs_generated_conversations() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        let (testee, partner) = agents();

        let (run_id, generated) = tracker
            .generate(&testee, &partner, &OpenerSource::None, &experiment())
            .await
            .unwrap();

        let records = tracker.replay(&[run_id]).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.config.testee_id, "testee-model");
        assert_eq!(record.testee.id(), "testee-model");
        assert_eq!(record.conversations.len(), generated.len());
        for (replayed, original) in record.conversations.iter().zip(&generated) {
            assert_eq!(replayed.messages(), original.messages());
        }
    }

    #[test]
    fn replay_of_unknown_run_fails() {
        let dir = tempdir().unwrap();
        let tracker = RunTracker::open(dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            tracker.replay(&[5]),
            Err(EngineError::RunNotFound(5))
        ));
    }
}
