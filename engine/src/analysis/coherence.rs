//! Coherence analysis
//!
//! Pairs every testee reply with the message it answers and asks the
//! plausibility predictor how likely the reply is as a follow-up. The
//! stored value is `1 - positive_probability`, so higher means less
//! coherent.

use async_trait::async_trait;

use crate::conversation::Conversation;

use super::{AnalysisError, Analyzer, CoherenceScore, CoherenceScorer, ConvReport};

pub struct CoherenceAnalyzer {
    scorer: Box<dyn CoherenceScorer>,
}

impl CoherenceAnalyzer {
    pub fn new(scorer: Box<dyn CoherenceScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Analyzer for CoherenceAnalyzer {
    fn id(&self) -> &'static str {
        "coherence"
    }

    async fn analyse(&self, conv: &Conversation) -> Result<ConvReport, AnalysisError> {
        let pairs: Vec<(String, String)> = conv
            .testee_pairs()
            .into_iter()
            .map(|pair| (pair.previous, pair.reply))
            .collect();
        if pairs.is_empty() {
            return Ok(ConvReport::Coherence(Vec::new()));
        }

        let probabilities = self.scorer.score_pairs(&pairs).await?;

        let rows = probabilities
            .iter()
            .enumerate()
            .map(|(idx, &p)| CoherenceScore {
                msg_nbr: idx as u32 + 1,
                neg_pred: 1.0 - p,
            })
            .collect();
        Ok(ConvReport::Coherence(rows))
    }
}
