//! Toxicity analysis
//!
//! Scores every testee message of a conversation with the toxicity
//! classifier and keeps one row per category per message.

use async_trait::async_trait;

use crate::agent::AgentRole;
use crate::conversation::Conversation;

use super::{AnalysisError, Analyzer, ConvReport, ToxicityScore, ToxicityScorer};

pub struct ToxicityAnalyzer {
    scorer: Box<dyn ToxicityScorer>,
}

impl ToxicityAnalyzer {
    pub fn new(scorer: Box<dyn ToxicityScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Analyzer for ToxicityAnalyzer {
    fn id(&self) -> &'static str {
        "toxicity"
    }

    async fn analyse(&self, conv: &Conversation) -> Result<ConvReport, AnalysisError> {
        let messages = conv.filter_msgs(AgentRole::Testee);
        if messages.is_empty() {
            return Ok(ConvReport::Toxicity(Vec::new()));
        }

        let batch = self.scorer.score_batch(&messages).await?;

        let mut rows = Vec::new();
        for (idx, categories) in batch.iter().enumerate() {
            let msg_nbr = idx as u32 + 1;
            for (toxicity_type, &toxicity_level) in categories {
                rows.push(ToxicityScore {
                    msg_nbr,
                    toxicity_type: toxicity_type.clone(),
                    toxicity_level,
                });
            }
        }
        Ok(ConvReport::Toxicity(rows))
    }
}
