//! Scoring service clients
//!
//! The toxicity and coherence analyzers delegate model inference to
//! external classifier services behind small traits, so tests can swap in
//! doubles and the analyzers stay free of HTTP details.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::AnalysisError;

/// Scores of one message, keyed by toxicity category
pub type CategoryScores = BTreeMap<String, f64>;

/// Toxicity classifier seam: one score per category per input text.
#[async_trait]
pub trait ToxicityScorer: Send + Sync {
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<CategoryScores>, AnalysisError>;
}

/// Next-message-plausibility seam: for each `(previous, reply)` pair, the
/// probability that the reply plausibly follows the previous message.
#[async_trait]
pub trait CoherenceScorer: Send + Sync {
    async fn score_pairs(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<f64>, AnalysisError>;
}

fn map_send_error(e: reqwest::Error, url: &str) -> AnalysisError {
    if e.is_timeout() || e.is_connect() {
        AnalysisError::ScorerUnavailable(format!("Cannot reach scoring service at {}", url))
    } else {
        AnalysisError::Scorer(e.to_string())
    }
}

/// Toxicity classifier over HTTP
pub struct HttpToxicityScorer {
    url: String,
    client: Client,
}

impl HttpToxicityScorer {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ToxicityRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ToxicityResponse {
    scores: Vec<CategoryScores>,
}

#[async_trait]
impl ToxicityScorer for HttpToxicityScorer {
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<CategoryScores>, AnalysisError> {
        debug!(texts = texts.len(), url = %self.url, "toxicity scoring request");

        let response = self
            .client
            .post(&self.url)
            .json(&ToxicityRequest { texts })
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.url))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Scorer(format!(
                "Toxicity service returned HTTP {}",
                response.status()
            )));
        }

        let body: ToxicityResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Response(e.to_string()))?;

        if body.scores.len() != texts.len() {
            return Err(AnalysisError::Response(format!(
                "Expected {} score sets, got {}",
                texts.len(),
                body.scores.len()
            )));
        }
        Ok(body.scores)
    }
}

/// Plausibility predictor over HTTP. Requests are chunked so long runs do
/// not produce oversized payloads.
pub struct HttpCoherenceScorer {
    url: String,
    batch_size: usize,
    client: Client,
}

impl HttpCoherenceScorer {
    pub fn new(url: &str, batch_size: usize) -> Self {
        Self {
            url: url.to_string(),
            batch_size: batch_size.max(1),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn score_chunk(
        &self,
        chunk: &[(String, String)],
    ) -> Result<Vec<f64>, AnalysisError> {
        let response = self
            .client
            .post(&self.url)
            .json(&CoherenceRequest { pairs: chunk })
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.url))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Scorer(format!(
                "Coherence service returned HTTP {}",
                response.status()
            )));
        }

        let body: CoherenceResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Response(e.to_string()))?;

        if body.probabilities.len() != chunk.len() {
            return Err(AnalysisError::Response(format!(
                "Expected {} probabilities, got {}",
                chunk.len(),
                body.probabilities.len()
            )));
        }
        Ok(body.probabilities)
    }
}

#[derive(Debug, Serialize)]
struct CoherenceRequest<'a> {
    pairs: &'a [(String, String)],
}

#[derive(Debug, Deserialize)]
struct CoherenceResponse {
    probabilities: Vec<f64>,
}

#[async_trait]
impl CoherenceScorer for HttpCoherenceScorer {
    async fn score_pairs(
        &self,
        pairs: &[(String, String)],
    ) -> Result<Vec<f64>, AnalysisError> {
        debug!(
            pairs = pairs.len(),
            batch_size = self.batch_size,
            url = %self.url,
            "coherence scoring request"
        );

        let mut probabilities = Vec::with_capacity(pairs.len());
        for chunk in pairs.chunks(self.batch_size) {
            probabilities.extend(self.score_chunk(chunk).await?);
        }
        Ok(probabilities)
    }
}
