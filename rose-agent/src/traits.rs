// ABOUTME: Collaborator traits the dispatch loop and channel relay depend on.
// ABOUTME: Each trait is one external capability so fakes and real clients are interchangeable.

use crate::types::{Agent, ChatTurn, Ticket, TicketStatus};
use anyhow::Result;
use async_trait::async_trait;

/// "list agents" and "get agent by id"
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<Agent>>;

    /// None when the directory does not know the id
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>>;
}

/// "run inference for agent X over a message history"
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging and metrics
    fn name(&self) -> &'static str;

    /// Generate the next assistant message for `agent_id` given the full transcript
    async fn generate(&self, agent_id: &str, transcript: &[ChatTurn]) -> Result<String>;
}

/// "list tickets by status"
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>>;
}

/// "emit an audit event". Fire-and-forget: implementations never block the caller
/// and swallow their own failures.
pub trait EventSink: Send + Sync {
    fn emit(&self, source: &str, event: &str, message: Option<String>);
}
