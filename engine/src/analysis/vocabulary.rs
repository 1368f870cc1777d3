//! Vocabulary size analysis
//!
//! Counts the words a testee uses across a conversation and classifies
//! each by its rank in a frequency-ordered word list. Contractions are
//! expanded to full-form tokens before counting, so "it's" contributes to
//! "it" and "is". Words absent from the frequency list land in the
//! non-frequent bucket with no rank, which is an expected outcome rather
//! than an error.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::fs;

use crate::agent::AgentRole;
use crate::config::Config;
use crate::conversation::Conversation;
use crate::error::EngineError;

use super::{AnalysisError, Analyzer, ConvReport, VocabularyCounts};

const DEFAULT_FREQUENCY_LIST: &str = include_str!("../../data/count_1w.txt");
const DEFAULT_CONTRACTIONS: &str = include_str!("../../data/contractions.txt");

/// Frequency ranks and contraction expansions, loaded once per pipeline.
pub struct Lexicon {
    /// word -> 1-based rank, rank 1 is the most frequent word
    word2rank: HashMap<String, i64>,

    /// contraction -> first listed full-form expansion
    contractions: HashMap<String, String>,
}

impl Lexicon {
    /// Load from the configured paths, falling back to the embedded data
    /// files when a path is not set.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let frequency = match &config.lexicon.frequency_list {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                EngineError::Config(format!(
                    "Failed to read frequency list {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_FREQUENCY_LIST.to_string(),
        };
        let contractions = match &config.lexicon.contractions {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                EngineError::Config(format!(
                    "Failed to read contraction table {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => DEFAULT_CONTRACTIONS.to_string(),
        };
        Self::parse(&frequency, &contractions)
    }

    /// Parse raw lexicon content. The frequency list is one
    /// `word<TAB>count` line per word ordered most frequent first; the
    /// contraction table is `contraction<TAB>expansion` with `/`-separated
    /// alternative expansions, of which the first is kept.
    pub fn parse(frequency_list: &str, contraction_table: &str) -> Result<Self, EngineError> {
        let mut word2rank = HashMap::new();
        for (idx, line) in frequency_list.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((word, _count)) = line.split_once('\t') else {
                return Err(EngineError::Config(format!(
                    "Malformed frequency list line {}: '{}'",
                    idx + 1,
                    line
                )));
            };
            let rank = idx as i64 + 1;
            word2rank.entry(word.to_lowercase()).or_insert(rank);
        }

        let mut contractions = HashMap::new();
        for (idx, line) in contraction_table.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((short, expansions)) = line.split_once('\t') else {
                return Err(EngineError::Config(format!(
                    "Malformed contraction line {}: '{}'",
                    idx + 1,
                    line
                )));
            };
            let expansion = expansions.split('/').next().unwrap_or(expansions).trim();
            contractions.insert(short.to_lowercase(), expansion.to_lowercase());
        }

        Ok(Self {
            word2rank,
            contractions,
        })
    }

    pub fn rank(&self, word: &str) -> Option<i64> {
        self.word2rank.get(word).copied()
    }

    fn expand(&self, token: &str) -> Option<&str> {
        self.contractions.get(token).map(String::as_str)
    }
}

pub struct VocabularyAnalyzer {
    lexicon: Lexicon,
    token_pattern: Regex,
}

impl VocabularyAnalyzer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self {
            lexicon,
            token_pattern: Regex::new(r"[\w']+").expect("Invalid token pattern"),
        }
    }

    fn count_words(&self, text: &str) -> VocabularyCounts {
        let text = text.to_lowercase();
        let mut counts = VocabularyCounts::new();
        for token in self.token_pattern.find_iter(&text) {
            let token = token.as_str();
            match self.lexicon.expand(token) {
                Some(expansion) => {
                    for word in expansion.split_whitespace() {
                        self.bump(&mut counts, word);
                    }
                }
                None => self.bump(&mut counts, token),
            }
        }
        counts
    }

    fn bump(&self, counts: &mut VocabularyCounts, word: &str) {
        let key = (word.to_string(), self.lexicon.rank(word));
        *counts.entry(key).or_insert(0) += 1;
    }
}

#[async_trait]
impl Analyzer for VocabularyAnalyzer {
    fn id(&self) -> &'static str {
        "vocabulary"
    }

    async fn analyse(&self, conv: &Conversation) -> Result<ConvReport, AnalysisError> {
        let text = conv.filter_msgs(AgentRole::Testee).join(" ");
        Ok(ConvReport::Vocabulary(self.count_words(&text)))
    }
}
