//! Human-operated agent
//!
//! Reads each reply from stdin. Useful for piloting a conversation partner
//! by hand; requires someone at the keyboard.

use async_trait::async_trait;
use std::io::Write;

use super::{AgentError, AgentRole, ConvAgent, Result};

/// Agent whose replies are typed by a human operator
#[derive(Debug, Clone)]
pub struct HumanAgent {
    role: AgentRole,
}

impl HumanAgent {
    pub fn new(role: AgentRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl ConvAgent for HumanAgent {
    fn id(&self) -> &str {
        "human"
    }

    fn role(&self) -> AgentRole {
        self.role
    }

    async fn act(&self, _history: &[String]) -> Result<String> {
        // Blocking terminal I/O stays off the async executor threads.
        tokio::task::spawn_blocking(|| {
            let mut stdout = std::io::stdout();
            stdout
                .write_all(b"You: ")
                .and_then(|_| stdout.flush())
                .map_err(|e| AgentError::Input(e.to_string()))?;

            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .map_err(|e| AgentError::Input(e.to_string()))?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(|e| AgentError::Input(e.to_string()))?
    }
}
