//! Readability analysis
//!
//! Computes a readability index over all testee messages of a conversation:
//! `words/sentences + 100 * long_words/words`, where long words have more
//! than six characters. Sentences are counted per message from `.`, `!`
//! and `?` occurrences, plus one implicit sentence when a message does not
//! end in a terminator. A conversation with no testee words yields no
//! metric at all.

use async_trait::async_trait;
use regex::Regex;

use crate::agent::AgentRole;
use crate::conversation::Conversation;

use super::{AnalysisError, Analyzer, ConvReport};

const LONG_WORD_LEN: usize = 6;

pub struct ReadabilityAnalyzer {
    word_pattern: Regex,
}

impl ReadabilityAnalyzer {
    pub fn new() -> Self {
        Self {
            word_pattern: Regex::new(r"[\w']+").expect("Invalid word pattern"),
        }
    }

    fn index(&self, messages: &[String]) -> Option<f64> {
        let mut sentences = 0u64;
        let mut words = 0u64;
        let mut long_words = 0u64;

        for message in messages {
            sentences += count_sentences(message);
            for word in self.word_pattern.find_iter(message) {
                words += 1;
                if word.as_str().chars().count() > LONG_WORD_LEN {
                    long_words += 1;
                }
            }
        }

        if words == 0 || sentences == 0 {
            return None;
        }
        Some(words as f64 / sentences as f64 + 100.0 * long_words as f64 / words as f64)
    }
}

impl Default for ReadabilityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Count `.` / `!` / `?` occurrences, plus one implicit sentence when the
/// final whitespace token carries no terminator.
fn count_sentences(text: &str) -> u64 {
    let terminated = text
        .chars()
        .filter(|c| matches!(c, '.' | '!' | '?'))
        .count() as u64;

    let implicit = match text.split_whitespace().last() {
        Some(last) if !last.contains(['.', '!', '?']) => 1,
        _ => 0,
    };

    terminated + implicit
}

#[async_trait]
impl Analyzer for ReadabilityAnalyzer {
    fn id(&self) -> &'static str {
        "readability"
    }

    async fn analyse(&self, conv: &Conversation) -> Result<ConvReport, AnalysisError> {
        let messages = conv.filter_msgs(AgentRole::Testee);
        Ok(ConvReport::Readability(self.index(&messages)))
    }
}
