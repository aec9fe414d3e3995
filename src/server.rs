// ABOUTME: HTTP API: queue protocol under /api, channel relay endpoints, health and Prometheus metrics
// ABOUTME: Maps core errors to status codes with a {"error": ...} body

use crate::context::AppContext;
use crate::relay::{ChannelRelay, InboundEvent};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rose_core::{ChannelAssignment, Error, Participant};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: AppContext,
    pub relay: ChannelRelay,
    pub metrics: PrometheusHandle,
}

/// Error response: status from the core error kind, body `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Storage(_) | Error::Serialization(_) | Error::LockPoisoned => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub participants: Vec<Participant>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindSessionRequest {
    pub participants: Vec<Participant>,
}

#[derive(Debug, Serialize)]
pub struct SessionIdResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub user: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_clear_unseen")]
    pub clear_unseen: bool,
}

fn default_clear_unseen() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub user: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub participants: Vec<Participant>,
    pub messages: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SendToChannelRequest {
    pub channel_id: String,
    pub message: String,
}

pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/find", post(find_session))
        .route("/sessions/updated", get(list_updated))
        .route("/sessions/{session_id}/history", get(get_history))
        .route("/messages", post(send_message))
        .route("/poll", get(poll))
        .route("/channels/inbound", post(channel_inbound))
        .route(
            "/channels/assignments",
            get(list_assignments).put(upsert_assignment),
        )
        .route(
            "/channels/assignments/{community_id}/{channel_id}",
            delete(delete_assignment),
        )
        .route("/send-to-channel", post(send_to_channel));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(state: ApiState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.ctx.config.server.host, state.ctx.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    state.metrics.render()
}

async fn create_session(
    State(state): State<ApiState>,
    Json(payload): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionIdResponse>)> {
    let created = state
        .ctx
        .queue
        .create_or_get_session(&payload.participants, payload.session_id.as_deref())?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SessionIdResponse { session_id: created.id })))
}

async fn find_session(
    State(state): State<ApiState>,
    Json(payload): Json<FindSessionRequest>,
) -> ApiResult<Json<SessionIdResponse>> {
    let session_id = state.ctx.queue.find_by_participants(&payload.participants)?;
    Ok(Json(SessionIdResponse { session_id }))
}

async fn list_updated(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let session_ids = state.ctx.queue.list_unseen_ids()?;
    Ok(Json(json!({ "session_ids": session_ids })))
}

async fn get_history(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let history = state
        .ctx
        .queue
        .get_history(&session_id, query.clear_unseen)?;
    Ok(Json(HistoryResponse {
        participants: history.participants,
        messages: history
            .messages
            .into_iter()
            .map(|m| HistoryEntry {
                user: m.sender,
                message: m.content,
            })
            .collect(),
    }))
}

async fn send_message(
    State(state): State<ApiState>,
    Json(payload): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .ctx
        .queue
        .append_message(&payload.session_id, &payload.user, &payload.message)?;
    Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}

async fn poll(
    State(state): State<ApiState>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let has_unseen = match query.session_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => state.ctx.queue.has_unseen(id)?,
        _ => false,
    };
    Ok(Json(json!({ "has_unseen": has_unseen })))
}

async fn channel_inbound(
    State(state): State<ApiState>,
    Json(event): Json<InboundEvent>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    for (field, value) in [
        ("communityId", &event.community_id),
        ("channelId", &event.channel_id),
        ("userId", &event.user_id),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{} must not be blank", field)).into());
        }
    }

    let accepted = state.relay.spawn(event);
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))))
}

async fn list_assignments(
    State(state): State<ApiState>,
) -> ApiResult<Json<Vec<ChannelAssignment>>> {
    Ok(Json(state.ctx.assignments.list()?))
}

async fn upsert_assignment(
    State(state): State<ApiState>,
    Json(payload): Json<ChannelAssignment>,
) -> ApiResult<Json<ChannelAssignment>> {
    state.ctx.assignments.upsert(
        &payload.community_id,
        &payload.channel_id,
        &payload.agent_id,
    )?;
    Ok(Json(payload))
}

async fn delete_assignment(
    State(state): State<ApiState>,
    Path((community_id, channel_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.ctx.assignments.delete(&community_id, &channel_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound("No assignment found for this community and channel".to_string()).into())
    }
}

async fn send_to_channel(
    State(state): State<ApiState>,
    Json(payload): Json<SendToChannelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let channel = state.relay.channel();
    if !channel.is_ready() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("{} channel is not connected", channel.platform_id()),
        ));
    }

    channel
        .send(&payload.channel_id, &payload.message)
        .await
        .map_err(|e| ApiError::from(Error::upstream(&e)))?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::session_not_found("x"), StatusCode::NOT_FOUND),
            (Error::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (Error::Upstream("down".into()), StatusCode::BAD_GATEWAY),
            (Error::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
            (Error::LockPoisoned, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }
}
