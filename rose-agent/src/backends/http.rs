// ABOUTME: reqwest clients for the agent manager, ticket manager and control panel.
// ABOUTME: Control panel events are spawned onto the runtime and never surface errors.

use crate::traits::{AgentDirectory, EventSink, InferenceBackend, TicketSource};
use crate::types::{Agent, ChatTurn, Ticket, TicketStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for listing/lookup calls
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for posting an audit event
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct ChatRequest<'a> {
    agent_id: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct ChatResponse {
    content: String,
}

/// Agent listing and chat inference against the agent manager
#[derive(Clone)]
pub struct AgentManagerClient {
    base_url: String,
    client: reqwest::Client,
    chat_timeout: Duration,
}

impl AgentManagerClient {
    pub fn new(base_url: &str, chat_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build agent manager HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            chat_timeout,
        })
    }
}

#[async_trait]
impl AgentDirectory for AgentManagerClient {
    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let url = format!("{}/api/agents", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach agent manager at {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list agents: {}", response.status());
        }

        let agents: Vec<Agent> = response.json().await.context("Invalid agent listing")?;
        Ok(agents)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let url = format!("{}/api/agents/{}", self.base_url, agent_id);
        let response = self
            .client
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach agent manager at {}", url))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Failed to fetch agent {}: {}", agent_id, response.status());
        }

        let agent: Agent = response.json().await.context("Invalid agent record")?;
        Ok(Some(agent))
    }
}

#[async_trait]
impl InferenceBackend for AgentManagerClient {
    fn name(&self) -> &'static str {
        "agentmanager"
    }

    async fn generate(&self, agent_id: &str, transcript: &[ChatTurn]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(self.chat_timeout)
            .json(&ChatRequest {
                agent_id,
                messages: transcript,
            })
            .send()
            .await
            .with_context(|| format!("Chat request for agent {} failed", agent_id))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat for agent {} returned {}: {}", agent_id, status, body);
        }

        let reply: ChatResponse = response.json().await.context("Invalid chat response")?;
        Ok(reply.content)
    }
}

#[derive(Clone)]
pub struct TicketManagerClient {
    base_url: String,
    client: reqwest::Client,
}

impl TicketManagerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TicketSource for TicketManagerClient {
    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>> {
        let url = format!("{}/api/tickets", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("status", status.as_str())])
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach ticket manager at {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list {} tickets: {}", status, response.status());
        }

        let tickets: Vec<Ticket> = response.json().await.context("Invalid ticket listing")?;
        Ok(tickets)
    }
}

#[derive(Serialize)]
struct EventPayload {
    source: String,
    event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// POSTs audit events to `{base}/api/events` in the background
#[derive(Clone)]
pub struct ControlPanelEvents {
    url: String,
    client: reqwest::Client,
}

impl ControlPanelEvents {
    pub fn new(base_url: &str) -> Self {
        Self {
            url: format!("{}/api/events", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
        }
    }
}

impl EventSink for ControlPanelEvents {
    fn emit(&self, source: &str, event: &str, message: Option<String>) {
        let payload = EventPayload {
            source: source.to_string(),
            event: event.to_string(),
            message,
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(event = %payload.event, "No runtime available, dropping audit event");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .timeout(EVENT_TIMEOUT)
                .json(&payload)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, event = %payload.event, "Failed to report event to control panel");
            }
        });
    }
}

/// Used when no control panel is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn emit(&self, _source: &str, _event: &str, _message: Option<String>) {}
}
