// ABOUTME: Collaborator implementations over HTTP and a local stdio process.
// ABOUTME: InferenceTransport selects which inference backend is built from config.

pub mod http;
pub mod stdio;

use crate::InferenceBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use http::{AgentManagerClient, ControlPanelEvents, NoopEvents, TicketManagerClient};
pub use stdio::StdioInference;

/// How inference requests leave the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum InferenceTransport {
    /// The agent manager's chat API
    Http {
        /// Defaults to the agent manager URL
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default = "default_inference_timeout_secs")]
        timeout_secs: u64,
    },
    /// A local command spawned per request
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_inference_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_inference_timeout_secs() -> u64 {
    120
}

impl Default for InferenceTransport {
    fn default() -> Self {
        Self::Http {
            base_url: None,
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl InferenceTransport {
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Http { timeout_secs, .. } | Self::Stdio { timeout_secs, .. } => {
                Duration::from_secs(*timeout_secs)
            }
        }
    }

    /// Build the backend; `default_base_url` is used by `Http` without its own URL
    pub fn build(&self, default_base_url: &str) -> anyhow::Result<Arc<dyn InferenceBackend>> {
        let backend: Arc<dyn InferenceBackend> = match self {
            Self::Http { base_url, .. } => {
                let url = base_url.as_deref().unwrap_or(default_base_url);
                Arc::new(AgentManagerClient::new(url, self.timeout())?)
            }
            Self::Stdio { command, args, .. } => Arc::new(StdioInference::new(
                command.clone(),
                args.clone(),
                self.timeout(),
            )),
        };
        tracing::info!(backend = backend.name(), "Inference backend ready");
        Ok(backend)
    }
}
