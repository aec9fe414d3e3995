// ABOUTME: Integration tests for the dispatch loop over an in-memory store and collaborator fakes
// ABOUTME: Covers responder selection, reply append, ticket announcements and collaborator failures

mod common;

use common::{harness, seed_session, ticket};
use rose::dispatch::{task_session_id, DispatchLoop};
use rose::TickReport;
use rose_agent::testing::{MockAgents, MockInference, MockTickets};
use rose_agent::{ChatTurn, TicketStatus};
use rose_core::{Error, Participant};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Chat update
// =============================================================================

#[tokio::test]
async fn test_single_agent_replies_to_human() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().reply("hello Alice"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;
    assert_eq!(
        report,
        TickReport {
            replies: 1,
            ..TickReport::default()
        }
    );

    let calls = h.inference.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].agent_id, "agent-1");
    assert_eq!(calls[0].transcript, vec![ChatTurn::user("hi")]);

    let history = h.ctx.queue.get_history("s1", false).unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.sender, "Bot");
    assert_eq!(last.content, "hello Alice");
    assert_eq!(last.ordinal, 2);

    // The reply is itself a new message for whoever polls the session
    assert!(h.ctx.queue.has_unseen("s1").unwrap());
    assert!(h.events.names().contains(&"dispatch.found_message".to_string()));
}

#[tokio::test]
async fn test_agent_does_not_answer_itself() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().reply("hello").otherwise("unexpected"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );
    let dispatch = DispatchLoop::new(h.ctx.clone());

    dispatch.tick().await;
    let second = dispatch.tick().await;

    assert_eq!(second.replies, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(h.inference.calls().len(), 1);
    assert!(!h.ctx.queue.has_unseen("s1").unwrap());
    assert_eq!(h.ctx.queue.get_history("s1", false).unwrap().messages.len(), 2);
}

#[tokio::test]
async fn test_two_agents_alternate() {
    let h = harness(
        MockAgents::new()
            .with_agent("id-a", "BotA")
            .with_agent("id-b", "BotB"),
        MockInference::new().reply("pong"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "duo",
        [Participant::agent("BotA"), Participant::agent("BotB")],
        &[("BotA", "ping")],
    );

    DispatchLoop::new(h.ctx.clone()).tick().await;

    let calls = h.inference.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].agent_id, "id-b");
    // BotA's message is a user turn from BotB's point of view
    assert_eq!(calls[0].transcript, vec![ChatTurn::user("ping")]);

    let last = h.ctx.queue.get_history("duo", false).unwrap().messages;
    assert_eq!(last.last().unwrap().sender, "BotB");
}

#[tokio::test]
async fn test_transcript_marks_responder_turns_as_assistant() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().reply("third"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "first"), ("Bot", "second"), ("Alice", "again")],
    );

    DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(
        h.inference.calls()[0].transcript,
        vec![
            ChatTurn::user("first"),
            ChatTurn::assistant("second"),
            ChatTurn::user("again"),
        ]
    );
}

#[tokio::test]
async fn test_inference_failure_skips_session_and_continues() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().fail("model offline").reply("second session ok"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "a-first",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );
    seed_session(
        &h.ctx,
        "b-second",
        [Participant::human("Carol"), Participant::agent("Bot")],
        &[("Carol", "hey")],
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.replies, 1);
    assert_eq!(h.ctx.queue.get_history("a-first", false).unwrap().messages.len(), 1);
    assert_eq!(
        h.ctx.queue.get_history("b-second", false).unwrap().last().unwrap().content,
        "second session ok"
    );
}

#[tokio::test]
async fn test_unknown_agent_name_is_skipped() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "SomeoneElse"),
        MockInference::new(),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report.skipped, 1);
    assert!(h.inference.calls().is_empty());
}

#[tokio::test]
async fn test_session_without_agents_is_skipped() {
    let h = harness(MockAgents::new(), MockInference::new(), MockTickets::new());
    seed_session(
        &h.ctx,
        "humans",
        [Participant::human("Alice"), Participant::human("Bob")],
        &[("Alice", "hi Bob")],
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report.skipped, 1);
    assert!(!h.ctx.queue.has_unseen("humans").unwrap());
}

#[tokio::test]
async fn test_agent_listing_failure_keeps_flags_for_next_tick() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().reply("late but here"),
        MockTickets::new(),
    );
    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );
    let dispatch = DispatchLoop::new(h.ctx.clone());

    h.agents.set_failing(true);
    let report = dispatch.tick().await;
    assert_eq!(report, TickReport::default());
    assert!(h.ctx.queue.has_unseen("s1").unwrap());

    h.agents.set_failing(false);
    let report = dispatch.tick().await;
    assert_eq!(report.replies, 1);
}

#[tokio::test]
async fn test_no_unseen_sessions_skips_agent_listing() {
    let h = harness(MockAgents::new(), MockInference::new(), MockTickets::new());

    DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(h.agents.list_calls(), 0);
}

// =============================================================================
// Ticket dispatch
// =============================================================================

#[tokio::test]
async fn test_ticket_announced_once() {
    let h = harness(
        MockAgents::new(),
        MockInference::new(),
        MockTickets::new().with_ticket(ticket("T1", Some("Bot"), "Fix bug", TicketStatus::Todo)),
    );
    let dispatch = DispatchLoop::new(h.ctx.clone());

    let first = dispatch.tick().await;
    assert_eq!(first.announced, 1);
    // Same id scheme as sessions written by the earlier heartbeat service
    assert_eq!(
        h.ctx.queue.list_unseen_ids().unwrap(),
        vec!["RoseHeartbeat-task-T1".to_string()]
    );

    let session_id = task_session_id("T1");
    let history = h.ctx.queue.get_history(&session_id, false).unwrap();
    assert_eq!(history.messages.len(), 1);
    assert_eq!(history.messages[0].sender, "RoseHeartBeat");
    assert!(history.messages[0].content.contains("Fix bug"));
    assert_eq!(
        history.participants,
        vec![Participant::human("RoseHeartBeat"), Participant::agent("Bot")]
    );

    let second = dispatch.tick().await;
    assert_eq!(second.announced, 0);
    let history = h.ctx.queue.get_history(&session_id, false).unwrap();
    assert_eq!(history.messages.len(), 1);

    assert_eq!(
        h.events
            .names()
            .iter()
            .filter(|n| n.as_str() == "dispatch.found_task")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_announcement_is_answered_next_tick() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().reply("On it"),
        MockTickets::new().with_ticket(ticket("T1", Some("Bot"), "Fix bug", TicketStatus::Review)),
    );
    let dispatch = DispatchLoop::new(h.ctx.clone());

    dispatch.tick().await;
    let second = dispatch.tick().await;

    assert_eq!(second.replies, 1);
    let history = h.ctx.queue.get_history(&task_session_id("T1"), false).unwrap();
    assert_eq!(history.last().unwrap().content, "On it");
}

#[tokio::test]
async fn test_unassigned_and_blank_assignee_tickets_are_ignored() {
    let h = harness(
        MockAgents::new(),
        MockInference::new(),
        MockTickets::new()
            .with_ticket(ticket("T2", None, "Nobody", TicketStatus::Todo))
            .with_ticket(ticket("T3", Some("   "), "Blank", TicketStatus::Todo)),
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report.announced, 0);
    for id in ["T2", "T3"] {
        assert!(matches!(
            h.ctx.queue.get_history(&task_session_id(id), false),
            Err(Error::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_only_configured_statuses_are_listed() {
    let h = harness(
        MockAgents::new(),
        MockInference::new(),
        MockTickets::new().with_ticket(ticket("T4", Some("Bot"), "Done already", TicketStatus::Done)),
    );

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report.announced, 0);
    assert_eq!(
        h.tickets.requested(),
        vec![TicketStatus::Todo, TicketStatus::Review]
    );
}

#[tokio::test]
async fn test_ticket_listing_failure_skips_dispatch() {
    let h = harness(
        MockAgents::new(),
        MockInference::new(),
        MockTickets::new().with_ticket(ticket("T1", Some("Bot"), "Fix bug", TicketStatus::Todo)),
    );
    h.tickets.set_failing(true);

    let report = DispatchLoop::new(h.ctx.clone()).tick().await;

    assert_eq!(report, TickReport::default());
    assert!(h.ctx.queue.list_unseen_ids().unwrap().is_empty());
}

// =============================================================================
// Loop
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_ticks_until_cancelled() {
    let h = harness(
        MockAgents::new().with_agent("agent-1", "Bot"),
        MockInference::new().otherwise("ack"),
        MockTickets::new(),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(
        DispatchLoop::new(h.ctx.clone())
            .with_interval(Duration::from_secs(10))
            .run(cancel.clone()),
    );

    seed_session(
        &h.ctx,
        "s1",
        [Participant::human("Alice"), Participant::agent("Bot")],
        &[("Alice", "hi")],
    );
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(
        h.ctx.queue.get_history("s1", false).unwrap().last().unwrap().sender,
        "Bot"
    );

    cancel.cancel();
    handle.await.unwrap();
}
