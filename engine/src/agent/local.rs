//! Local text-generation agent
//!
//! Drives a locally hosted generation service (Ollama-style HTTP API,
//! typically at http://localhost:11434). The agent keeps a bounded chat
//! memory: only the last `chat_memory` history entries are sent with each
//! request, mirroring how the small seq2seq dialogue models were fed.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AgentError, AgentRole, ConvAgent, Result};
use crate::config::LocalBackendConfig;

/// Agent backed by a local generation HTTP service
#[derive(Debug, Clone)]
pub struct LocalGenAgent {
    id: String,
    role: AgentRole,
    base_url: String,
    model: String,
    chat_memory: usize,
    client: Client,
}

impl LocalGenAgent {
    pub fn new(id: impl Into<String>, role: AgentRole, backend: &LocalBackendConfig) -> Self {
        Self {
            id: id.into(),
            role,
            base_url: backend.base_url.clone(),
            model: backend.model.clone(),
            chat_memory: backend.chat_memory.max(1),
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Join the trailing chat-memory window into one prompt string.
    fn window_prompt(&self, history: &[String]) -> String {
        let start = history.len().saturating_sub(self.chat_memory);
        history[start..].join("\n")
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl ConvAgent for LocalGenAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn act(&self, history: &[String]) -> Result<String> {
        let prompt = self.window_prompt(history);

        tracing::debug!(
            agent = %self.id,
            model = %self.model,
            prompt_chars = prompt.len(),
            "local generation request"
        );

        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else if e.is_connect() {
                    AgentError::BackendUnavailable(format!(
                        "Cannot connect to generation service at {}",
                        self.base_url
                    ))
                } else {
                    AgentError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AgentError::BackendUnavailable(format!(
                "Generation service returned HTTP {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_only_trailing_entries() {
        let backend = LocalBackendConfig {
            chat_memory: 2,
            ..LocalBackendConfig::default()
        };
        let agent = LocalGenAgent::new("blenderbot90m", AgentRole::Testee, &backend);

        let history = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(agent.window_prompt(&history), "two\nthree");

        let short = vec!["only".to_string()];
        assert_eq!(agent.window_prompt(&short), "only");
    }
}
