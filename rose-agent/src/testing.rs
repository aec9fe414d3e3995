// ABOUTME: In-memory collaborator fakes for deterministic tests of dispatch and relay.
// ABOUTME: Scripted inference replies, static agent and ticket listings, recorded audit events.
//!
//! # Example
//!
//! ```
//! use rose_agent::testing::{MockAgents, MockInference};
//! use rose_agent::{AgentDirectory, ChatTurn, InferenceBackend};
//!
//! # async fn example() {
//! let agents = MockAgents::new().with_agent("agent-1", "Bot");
//! let inference = MockInference::new().reply("Hello!");
//!
//! assert_eq!(agents.list_agents().await.unwrap().len(), 1);
//! let reply = inference.generate("agent-1", &[ChatTurn::user("hi")]).await.unwrap();
//! assert_eq!(reply, "Hello!");
//! assert_eq!(inference.calls().len(), 1);
//! # }
//! ```

use crate::traits::{AgentDirectory, EventSink, InferenceBackend, TicketSource};
use crate::types::{Agent, ChatTurn, Ticket, TicketStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Static agent directory
#[derive(Default)]
pub struct MockAgents {
    agents: Mutex<Vec<Agent>>,
    fail: AtomicBool,
    list_calls: AtomicUsize,
}

impl MockAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, id: &str, name: &str) -> Self {
        guard(&self.agents).push(Agent {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Make every call fail until switched back
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDirectory for MockAgents {
    async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("agent directory unavailable");
        }
        Ok(guard(&self.agents).clone())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("agent directory unavailable");
        }
        Ok(guard(&self.agents)
            .iter()
            .find(|a| a.id == agent_id)
            .cloned())
    }
}

enum Scripted {
    Reply(String),
    Fail(String),
}

/// One recorded `generate` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceCall {
    pub agent_id: String,
    pub transcript: Vec<ChatTurn>,
}

/// Inference fake: answers from a script queue, then from the fallback reply
#[derive(Default)]
pub struct MockInference {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<InferenceCall>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply
    pub fn reply(self, text: &str) -> Self {
        guard(&self.script).push_back(Scripted::Reply(text.to_string()));
        self
    }

    /// Queue a failure
    pub fn fail(self, message: &str) -> Self {
        guard(&self.script).push_back(Scripted::Fail(message.to_string()));
        self
    }

    /// Reply used once the script is exhausted
    pub fn otherwise(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    /// Sleep (tokio time) before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<InferenceCall> {
        guard(&self.calls).clone()
    }
}

#[async_trait]
impl InferenceBackend for MockInference {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn generate(&self, agent_id: &str, transcript: &[ChatTurn]) -> Result<String> {
        guard(&self.calls).push(InferenceCall {
            agent_id: agent_id.to_string(),
            transcript: transcript.to_vec(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = guard(&self.script).pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(anyhow::anyhow!(message)),
            None => match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => anyhow::bail!("no scripted reply left for agent {}", agent_id),
            },
        }
    }
}

/// Ticket listing fake
#[derive(Default)]
pub struct MockTickets {
    tickets: Mutex<Vec<Ticket>>,
    fail: AtomicBool,
    requested: Mutex<Vec<TicketStatus>>,
}

impl MockTickets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(self, ticket: Ticket) -> Self {
        guard(&self.tickets).push(ticket);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Statuses requested so far, in call order
    pub fn requested(&self) -> Vec<TicketStatus> {
        guard(&self.requested).clone()
    }
}

#[async_trait]
impl TicketSource for MockTickets {
    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>> {
        guard(&self.requested).push(status);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("ticket manager unavailable");
        }
        Ok(guard(&self.tickets)
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub source: String,
    pub event: String,
    pub message: Option<String>,
}

/// Audit sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        guard(&self.events).clone()
    }

    /// Just the event names, in emission order
    pub fn names(&self) -> Vec<String> {
        guard(&self.events).iter().map(|e| e.event.clone()).collect()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, source: &str, event: &str, message: Option<String>) {
        guard(&self.events).push(RecordedEvent {
            source: source.to_string(),
            event: event.to_string(),
            message,
        });
    }
}
