// ABOUTME: Shared harness for root integration tests: an in-memory context wired to collaborator fakes
// ABOUTME: Keeps handles on the fakes so tests can script and inspect them

#![allow(dead_code)]

use rose::{AppContext, Collaborators};
use rose_agent::testing::{MockAgents, MockInference, MockTickets, RecordingEvents};
use rose_agent::{Ticket, TicketStatus};
use rose_core::{Config, Participant, SessionStore};
use std::sync::Arc;

pub struct Harness {
    pub ctx: AppContext,
    pub agents: Arc<MockAgents>,
    pub inference: Arc<MockInference>,
    pub tickets: Arc<MockTickets>,
    pub events: Arc<RecordingEvents>,
}

pub fn harness(agents: MockAgents, inference: MockInference, tickets: MockTickets) -> Harness {
    harness_with_config(Config::default(), agents, inference, tickets)
}

pub fn harness_with_config(
    config: Config,
    agents: MockAgents,
    inference: MockInference,
    tickets: MockTickets,
) -> Harness {
    let agents = Arc::new(agents);
    let inference = Arc::new(inference);
    let tickets = Arc::new(tickets);
    let events = Arc::new(RecordingEvents::new());

    let ctx = AppContext::new(
        config,
        SessionStore::in_memory().expect("in-memory store"),
        Collaborators {
            agents: agents.clone(),
            inference: inference.clone(),
            tickets: tickets.clone(),
            events: events.clone(),
        },
    )
    .expect("context");

    Harness {
        ctx,
        agents,
        inference,
        tickets,
        events,
    }
}

/// Create a session with the given pair and append messages in order
pub fn seed_session(ctx: &AppContext, id: &str, pair: [Participant; 2], messages: &[(&str, &str)]) {
    ctx.queue
        .create_or_get_session(&pair, Some(id))
        .expect("create session");
    for (sender, content) in messages {
        ctx.queue
            .append_message(id, sender, content)
            .expect("append message");
    }
}

pub fn ticket(id: &str, assignee: Option<&str>, title: &str, status: TicketStatus) -> Ticket {
    Ticket {
        id: id.to_string(),
        assignee: assignee.map(str::to_string),
        title: title.to_string(),
        instructions: format!("Instructions for {}", title),
        status,
    }
}
