// ABOUTME: Periodic dispatch loop: turns unseen sessions into agent replies and tickets into task sessions
// ABOUTME: Every per-session and per-ticket failure is logged and skipped so one bad item never stalls a tick

use crate::context::AppContext;
use crate::metrics;
use rose_agent::{ChatTurn, Ticket};
use rose_core::{Message, Participant};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Audit event source name
pub const EVENT_SOURCE: &str = "dispatch";

/// Stable session id for the task session of a ticket
pub fn task_session_id(ticket_id: &str) -> String {
    format!("RoseHeartbeat-task-{}", ticket_id)
}

/// First message of a task session
pub fn announcement_body(ticket: &Ticket) -> String {
    format!(
        "Task ({}): {}\n\n{}",
        ticket.status, ticket.title, ticket.instructions
    )
}

/// Pick the agent that should answer next.
///
/// Two agents: the one that did not send the last message. One agent: that agent,
/// unless it sent the last message itself. No agents: nobody.
pub fn select_responder(participants: &[Participant], last_sender: &str) -> Option<String> {
    let agents: Vec<&Participant> = participants.iter().filter(|p| p.is_agent).collect();
    match agents.as_slice() {
        [] => None,
        [only] if only.name == last_sender => None,
        [only] => Some(only.name.clone()),
        several => several
            .iter()
            .find(|p| p.name != last_sender)
            .map(|p| p.name.clone()),
    }
}

/// Responder's own messages become assistant turns, everything else user turns
pub fn build_transcript(messages: &[Message], responder: &str) -> Vec<ChatTurn> {
    messages
        .iter()
        .map(|m| {
            if m.sender == responder {
                ChatTurn::assistant(m.content.clone())
            } else {
                ChatTurn::user(m.content.clone())
            }
        })
        .collect()
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Agent replies appended
    pub replies: usize,
    /// Unseen sessions that needed no reply
    pub skipped: usize,
    /// Sessions or tickets that hit an error
    pub failed: usize,
    /// Task announcements appended
    pub announced: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    NoAgents,
    NoMessages,
    NoResponder,
    UnknownAgent,
}

enum SessionOutcome {
    Replied,
    Skipped(SkipReason),
}

pub struct DispatchLoop {
    ctx: AppContext,
    interval: Duration,
}

impl DispatchLoop {
    pub fn new(ctx: AppContext) -> Self {
        let interval = ctx.config.dispatch_interval();
        Self { ctx, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Tick, sleep, repeat until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Dispatch loop starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.tick().await;
            if report != TickReport::default() {
                tracing::info!(
                    replies = report.replies,
                    skipped = report.skipped,
                    failed = report.failed,
                    announced = report.announced,
                    "Dispatch tick finished"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    /// One pass: chat update, then ticket dispatch
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        self.chat_update(&mut report).await;
        self.ticket_dispatch(&mut report).await;

        metrics::record_dispatch_tick(started.elapsed());
        report
    }

    /// Answer every session whose unseen flag is set
    pub async fn chat_update(&self, report: &mut TickReport) {
        let session_ids = match self.ctx.queue.list_unseen_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list sessions with updates");
                return;
            }
        };
        if session_ids.is_empty() {
            return;
        }

        // Without the listing no responder can be resolved; leave the flags set for next tick
        let agents_by_name: HashMap<String, String> = match self.ctx.agents.list_agents().await {
            Ok(agents) => agents.into_iter().map(|a| (a.name, a.id)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list agents, skipping chat update");
                return;
            }
        };

        for session_id in session_ids {
            match self.process_session(&session_id, &agents_by_name).await {
                Ok(SessionOutcome::Replied) => {
                    report.replies += 1;
                    metrics::record_dispatch_reply("replied");
                }
                Ok(SessionOutcome::Skipped(reason)) => {
                    tracing::debug!(session_id = %session_id, reason = ?reason, "Session needs no reply");
                    report.skipped += 1;
                    metrics::record_dispatch_reply("skipped");
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to process session");
                    report.failed += 1;
                    metrics::record_dispatch_reply("failed");
                }
            }
        }
    }

    async fn process_session(
        &self,
        session_id: &str,
        agents_by_name: &HashMap<String, String>,
    ) -> anyhow::Result<SessionOutcome> {
        self.ctx.events.emit(
            EVENT_SOURCE,
            "dispatch.found_message",
            Some(format!("Processing new message in session {}", session_id)),
        );

        let history = self.ctx.queue.get_history(session_id, true)?;
        if history.agents().is_empty() {
            return Ok(SessionOutcome::Skipped(SkipReason::NoAgents));
        }
        let Some(last) = history.last() else {
            return Ok(SessionOutcome::Skipped(SkipReason::NoMessages));
        };

        let Some(responder) = select_responder(&history.participants, &last.sender) else {
            return Ok(SessionOutcome::Skipped(SkipReason::NoResponder));
        };

        let Some(agent_id) = agents_by_name.get(&responder) else {
            tracing::warn!(session_id = %session_id, agent = %responder, "Agent not found by name");
            return Ok(SessionOutcome::Skipped(SkipReason::UnknownAgent));
        };

        let transcript = build_transcript(&history.messages, &responder);
        tracing::debug!(
            session_id = %session_id,
            agent = %responder,
            turns = transcript.len(),
            backend = self.ctx.inference.name(),
            "Requesting agent reply"
        );

        let reply = self
            .ctx
            .inference
            .generate(agent_id, &transcript)
            .await
            .map_err(|e| anyhow::anyhow!("Inference failed for agent {}: {:#}", responder, e))?;

        let ordinal = self.ctx.queue.append_message(session_id, &responder, &reply)?;
        tracing::info!(session_id = %session_id, agent = %responder, ordinal, "Agent reply appended");
        Ok(SessionOutcome::Replied)
    }

    /// Open a task session for each assigned ticket and announce it once
    pub async fn ticket_dispatch(&self, report: &mut TickReport) {
        let mut tickets = Vec::new();
        for status in &self.ctx.config.dispatch.ticket_statuses {
            match self.ctx.tickets.list_by_status(*status).await {
                Ok(batch) => tickets.extend(batch),
                Err(e) => {
                    tracing::warn!(status = %status, error = %e, "Failed to list tickets, skipping ticket dispatch");
                    return;
                }
            }
        }

        for ticket in &tickets {
            match self.dispatch_ticket(ticket) {
                Ok(true) => {
                    report.announced += 1;
                    metrics::record_ticket_announced();
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(ticket_id = %ticket.id, error = %e, "Failed to dispatch ticket");
                    report.failed += 1;
                }
            }
        }
    }

    /// Returns true when an announcement was appended
    fn dispatch_ticket(&self, ticket: &Ticket) -> rose_core::Result<bool> {
        let Some(assignee) = ticket.assignee_name() else {
            return Ok(false);
        };

        let session_id = task_session_id(&ticket.id);
        let dispatcher = &self.ctx.config.dispatch.dispatcher_name;
        let participants = [Participant::human(dispatcher), Participant::agent(assignee)];
        self.ctx
            .queue
            .create_or_get_session(&participants, Some(&session_id))?;

        let history = self.ctx.queue.get_history(&session_id, false)?;
        if !history.messages.is_empty() {
            return Ok(false);
        }

        self.ctx
            .queue
            .append_message(&session_id, dispatcher, &announcement_body(ticket))?;
        tracing::info!(ticket_id = %ticket.id, session_id = %session_id, assignee = %assignee, "Task announced");
        self.ctx.events.emit(
            EVENT_SOURCE,
            "dispatch.found_task",
            Some(format!(
                "Dispatched task for ticket {}: {:?}",
                ticket.id, ticket.title
            )),
        );
        Ok(true)
    }
}
