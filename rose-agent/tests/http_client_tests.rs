// ABOUTME: Tests the reqwest collaborator clients against a local axum stand-in server.
// ABOUTME: Verifies request shapes, 404 handling, error statuses and fire-and-forget events.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rose_agent::backends::{AgentManagerClient, ControlPanelEvents, TicketManagerClient};
use rose_agent::{AgentDirectory, ChatTurn, EventSink, InferenceBackend, TicketSource, TicketStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Seen {
    chat_bodies: Arc<Mutex<Vec<Value>>>,
    events: Arc<Mutex<Vec<Value>>>,
    statuses: Arc<Mutex<Vec<String>>>,
}

async fn list_agents() -> Json<Value> {
    Json(json!([
        {"id": "a-1", "name": "Bot", "provider": "ollama", "model": "llama3"},
        {"id": "a-2", "name": "Helper"}
    ]))
}

async fn get_agent(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if id == "a-1" {
        Ok(Json(json!({"id": "a-1", "name": "Bot"})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn chat(State(seen): State<Seen>, Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    seen.chat_bodies.lock().unwrap().push(body.clone());
    if body["agent_id"] == "broken" {
        return Err(StatusCode::BAD_GATEWAY);
    }
    let count = body["messages"].as_array().map(|m| m.len()).unwrap_or(0);
    Ok(Json(json!({"content": format!("seen {} messages", count)})))
}

async fn tickets(
    State(seen): State<Seen>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let status = params.get("status").cloned().unwrap_or_default();
    seen.statuses.lock().unwrap().push(status.clone());
    if status == "todo" {
        Json(json!([
            {"id": "T1", "assignee": "Bot", "title": "Fix bug", "instructions": "Parser", "status": "todo"}
        ]))
    } else {
        Json(json!([]))
    }
}

async fn events(State(seen): State<Seen>, Json(body): Json<Value>) -> StatusCode {
    seen.events.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn spawn_server(seen: Seen) -> String {
    let app = Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}", get(get_agent))
        .route("/api/chat", post(chat))
        .route("/api/tickets", get(tickets))
        .route("/api/events", post(events))
        .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_agent_listing_and_lookup() {
    let base = spawn_server(Seen::default()).await;
    let client = AgentManagerClient::new(&format!("{}/", base), Duration::from_secs(5)).unwrap();

    let agents = client.list_agents().await.unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0].name, "Bot");

    assert_eq!(client.get_agent("a-1").await.unwrap().unwrap().id, "a-1");
    assert!(client.get_agent("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chat_sends_agent_and_transcript() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let client = AgentManagerClient::new(&base, Duration::from_secs(5)).unwrap();

    let transcript = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
    let reply = client.generate("a-1", &transcript).await.unwrap();
    assert_eq!(reply, "seen 2 messages");

    let bodies = seen.chat_bodies.lock().unwrap().clone();
    assert_eq!(
        bodies[0],
        json!({
            "agent_id": "a-1",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        })
    );
}

#[tokio::test]
async fn test_chat_error_status_is_error() {
    let base = spawn_server(Seen::default()).await;
    let client = AgentManagerClient::new(&base, Duration::from_secs(5)).unwrap();
    let err = client.generate("broken", &[]).await.unwrap_err();
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn test_unreachable_agent_manager_is_error() {
    // Port 9 (discard) on localhost is almost never listening
    let client = AgentManagerClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    assert!(client.list_agents().await.is_err());
}

#[tokio::test]
async fn test_tickets_by_status_query() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let client = TicketManagerClient::new(&base);

    let todo = client.list_by_status(TicketStatus::Todo).await.unwrap();
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].assignee_name(), Some("Bot"));
    assert!(client
        .list_by_status(TicketStatus::InProgress)
        .await
        .unwrap()
        .is_empty());

    assert_eq!(
        seen.statuses.lock().unwrap().clone(),
        vec!["todo".to_string(), "in_progress".to_string()]
    );
}

#[tokio::test]
async fn test_control_panel_event_is_posted_in_background() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let sink = ControlPanelEvents::new(&base);

    sink.emit("dispatch", "dispatch.found_task", Some("ticket T1".to_string()));
    sink.emit("relay", "relay.user_message", None);

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.events.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events should arrive");

    let events = seen.events.lock().unwrap().clone();
    let with_message = events
        .iter()
        .find(|e| e["event"] == "dispatch.found_task")
        .unwrap();
    assert_eq!(with_message["message"], "ticket T1");
    let without_message = events
        .iter()
        .find(|e| e["event"] == "relay.user_message")
        .unwrap();
    assert!(without_message.get("message").is_none());
}

#[test]
fn test_emit_without_runtime_does_not_panic() {
    let sink = ControlPanelEvents::new("http://127.0.0.1:9");
    sink.emit("dispatch", "dispatch.found_message", None);
}
