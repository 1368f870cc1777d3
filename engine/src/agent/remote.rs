//! Remote inference service agent
//!
//! Drives an externally hosted dialogue model behind a plain
//! `POST {"text": history} -> {"text": reply}` inference endpoint. The
//! service runs in a container named after the agent id; `setup` restarts
//! (or first launches) that container and waits a readiness delay, and
//! `shutdown` kills it. One container per testee means cross-testee
//! parallelism is unsafe with this backend — the port and container name
//! are shared.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

use super::{AgentError, AgentRole, ConvAgent, Result};
use crate::config::RemoteBackendConfig;

/// Agent backed by a containerized remote inference service
#[derive(Debug, Clone)]
pub struct RemoteServiceAgent {
    id: String,
    role: AgentRole,
    backend: RemoteBackendConfig,
    client: Client,
}

impl RemoteServiceAgent {
    pub fn new(id: impl Into<String>, role: AgentRole, backend: &RemoteBackendConfig) -> Self {
        Self {
            id: id.into(),
            role,
            backend: backend.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Join the trailing chat-memory window into one request string.
    fn window_text(&self, history: &[String]) -> String {
        let start = history.len().saturating_sub(self.backend.chat_memory.max(1));
        history[start..].join("\n")
    }

    async fn run_container_cmd(&self, args: &[&str]) -> Result<bool> {
        let status = Command::new(&self.backend.container_runtime)
            .args(args)
            .status()
            .await
            .map_err(|e| {
                AgentError::SetupFailed(format!(
                    "failed to invoke {}: {}",
                    self.backend.container_runtime, e
                ))
            })?;
        Ok(status.success())
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    text: String,
}

#[async_trait]
impl ConvAgent for RemoteServiceAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn act(&self, history: &[String]) -> Result<String> {
        let request = InferenceRequest {
            text: self.window_text(history),
        };

        let response = self
            .client
            .post(&self.backend.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else if e.is_connect() {
                    AgentError::BackendUnavailable(format!(
                        "Cannot connect to inference service at {}",
                        self.backend.base_url
                    ))
                } else {
                    AgentError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AgentError::BackendUnavailable(format!(
                "Inference service returned HTTP {}",
                response.status()
            )));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(e.to_string()))?;

        Ok(body.text.trim().to_string())
    }

    /// Restart the service container, launching it on first use, then wait
    /// for it to accept requests.
    async fn setup(&self) -> Result<()> {
        tracing::info!(agent = %self.id, "starting inference service container");

        let restarted = self
            .run_container_cmd(&["container", "restart", &self.id])
            .await?;

        if !restarted {
            let publish = format!("{}:{}", self.backend.port, self.backend.port);
            let launched = self
                .run_container_cmd(&[
                    "run", "--name", &self.id, "-d", "-p", &publish, &self.id,
                ])
                .await?;
            if !launched {
                return Err(AgentError::SetupFailed(format!(
                    "container {} could not be restarted or launched",
                    self.id
                )));
            }
        }

        tokio::time::sleep(Duration::from_secs(self.backend.ready_delay_secs)).await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!(agent = %self.id, "stopping inference service container");

        self.run_container_cmd(&["container", "kill", &self.id])
            .await
            .ok();
        tokio::time::sleep(Duration::from_secs(self.backend.stop_delay_secs)).await;
        Ok(())
    }
}
