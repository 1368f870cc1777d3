//! Metrics pipeline
//!
//! A fixed battery of analyzers folds over generated or replayed runs and
//! produces one typed report per analyzer. Each analyzer handles one
//! metric family: toxicity, vocabulary size, coherence, readability.
//! Analyzer failures are isolated: an error in one is logged with run
//! context and the remaining analyzers still run and export.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::error;

use crate::config::Config;
use crate::conversation::Conversation;
use crate::error::EngineError;
use crate::runs::Runs;

pub mod coherence;
pub mod readability;
pub mod scorers;
pub mod toxicity;
pub mod vocabulary;

pub use coherence::CoherenceAnalyzer;
pub use readability::ReadabilityAnalyzer;
pub use scorers::{
    CategoryScores, CoherenceScorer, HttpCoherenceScorer, HttpToxicityScorer, ToxicityScorer,
};
pub use toxicity::ToxicityAnalyzer;
pub use vocabulary::{Lexicon, VocabularyAnalyzer};

/// Errors raised while computing metrics
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Scoring service could not be reached
    #[error("Scoring service unavailable: {0}")]
    ScorerUnavailable(String),

    /// Scoring request failed after reaching the service
    #[error("Scoring request failed: {0}")]
    Scorer(String),

    /// Service answered with something the analyzer cannot use
    #[error("Malformed scorer response: {0}")]
    Response(String),

    /// Frequency list or contraction table could not be loaded
    #[error("Lexicon error: {0}")]
    Lexicon(String),
}

/// One toxicity score row: one category of one testee message
#[derive(Debug, Clone, PartialEq)]
pub struct ToxicityScore {
    /// 1-based position among the conversation's testee messages
    pub msg_nbr: u32,
    pub toxicity_type: String,
    pub toxicity_level: f64,
}

/// One coherence score row: one testee reply
#[derive(Debug, Clone, PartialEq)]
pub struct CoherenceScore {
    /// 1-based position among the conversation's testee messages
    pub msg_nbr: u32,

    /// `1 - positive_probability` from the plausibility predictor
    pub neg_pred: f64,
}

/// Word usage counter keyed by word and its frequency rank. `None` is the
/// non-frequent bucket: the word is absent from the frequency list.
pub type VocabularyCounts = BTreeMap<(String, Option<i64>), u64>;

/// Per-conversation result of one analyzer
#[derive(Debug, Clone, PartialEq)]
pub enum ConvReport {
    Toxicity(Vec<ToxicityScore>),
    Vocabulary(VocabularyCounts),
    Coherence(Vec<CoherenceScore>),

    /// `None` when the conversation had no testee words to measure
    Readability(Option<f64>),
}

/// All of one analyzer's results, keyed by `(run_id, conv_nbr)` with
/// `conv_nbr` 1-based within its run.
#[derive(Debug)]
pub struct AnalyzerReport {
    pub analyzer_id: &'static str,
    pub results: BTreeMap<(u32, u32), ConvReport>,
}

/// One metric family. `analyse` scores a single conversation; `analyse_all`
/// is an exhaustive fold over every conversation of every run.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn analyse(&self, conv: &Conversation) -> Result<ConvReport, AnalysisError>;

    async fn analyse_all(&self, runs: &Runs) -> Result<AnalyzerReport, AnalysisError> {
        let mut results = BTreeMap::new();
        for (&run_id, conversations) in runs {
            for (idx, conv) in conversations.iter().enumerate() {
                let conv_nbr = idx as u32 + 1;
                let report = self.analyse(conv).await?;
                results.insert((run_id, conv_nbr), report);
            }
        }
        Ok(AnalyzerReport {
            analyzer_id: self.id(),
            results,
        })
    }
}

/// The standard analyzer battery, run in a fixed order.
pub struct AnalysisPipeline {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalysisPipeline {
    pub fn new(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    /// Toxicity, vocabulary, coherence and readability with the configured
    /// scoring endpoints and lexical inputs.
    pub fn standard(config: &Config) -> Result<Self, EngineError> {
        let lexicon = Lexicon::from_config(config)?;
        Ok(Self::new(vec![
            Box::new(ToxicityAnalyzer::new(Box::new(HttpToxicityScorer::new(
                &config.scoring.toxicity_url,
            )))),
            Box::new(VocabularyAnalyzer::new(lexicon)),
            Box::new(CoherenceAnalyzer::new(Box::new(HttpCoherenceScorer::new(
                &config.scoring.coherence_url,
                config.scoring.batch_size,
            )))),
            Box::new(ReadabilityAnalyzer::new()),
        ]))
    }

    /// Run every analyzer over every run. A failing analyzer is logged and
    /// skipped; its report is simply absent from the output.
    pub async fn analyse_all(&self, runs: &Runs) -> Vec<AnalyzerReport> {
        let mut reports = Vec::with_capacity(self.analyzers.len());
        for analyzer in &self.analyzers {
            match analyzer.analyse_all(runs).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(analyzer = analyzer.id(), error = %e, "analyzer failed, skipping");
                }
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::conversation::Message;

    fn conversation(testee_texts: &[&str]) -> Conversation {
        let mut conv = Conversation::new("t", "p");
        for (i, text) in testee_texts.iter().enumerate() {
            conv.push(Message::new(
                format!("partner message {}", i),
                "p",
                AgentRole::OtherAgent,
            ));
            conv.push(Message::new(*text, "t", AgentRole::Testee));
        }
        conv
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl Analyzer for FailingAnalyzer {
        fn id(&self) -> &'static str {
            "failing"
        }
        async fn analyse(&self, _conv: &Conversation) -> Result<ConvReport, AnalysisError> {
            Err(AnalysisError::ScorerUnavailable("test failure".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_analyzer_does_not_block_others() {
        let pipeline = AnalysisPipeline::new(vec![
            Box::new(FailingAnalyzer),
            Box::new(ReadabilityAnalyzer::new()),
        ]);

        let mut runs = Runs::new();
        runs.insert(1, vec![conversation(&["Hello there one two."])]);

        let reports = pipeline.analyse_all(&runs).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].analyzer_id, "readability");
        assert!(reports[0].results.contains_key(&(1, 1)));
    }

    #[tokio::test]
    async fn analyse_all_covers_every_conversation() {
        let pipeline = AnalysisPipeline::new(vec![Box::new(ReadabilityAnalyzer::new())]);

        let mut runs = Runs::new();
        runs.insert(2, vec![conversation(&["One."]), conversation(&["Two."])]);
        runs.insert(5, vec![conversation(&["Three."])]);

        let reports = pipeline.analyse_all(&runs).await;
        let keys: Vec<_> = reports[0].results.keys().copied().collect();
        assert_eq!(keys, vec![(2, 1), (2, 2), (5, 1)]);
    }
}
