//! REST endpoint handlers for the broker API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness and registry counts |
//! | `POST` | `/api/sessions` | Issue a session token |
//! | `GET` | `/api/sessions/{id}/validate` | Check a session token |
//! | `GET` | `/api/sessions/{id}/channels` | Page through parsed channels |
//! | `POST` | `/api/sessions/{id}/channels` | Pipeline: append parsed channels |
//! | `POST` | `/api/sessions/{id}/events` | Pipeline: broadcast an event |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use guidesync_types::{
    Channel, ChunkResponse, CreateSessionResponse, GroupCount, SessionToken, SyncEvent,
    ValidateSessionResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;
use crate::store::DEFAULT_PAGE_LIMIT;

// ---------------------------------------------------------------------------
// Query and response structs
// ---------------------------------------------------------------------------

/// Query parameters for `GET /api/sessions/{id}/channels`.
#[derive(Debug, Deserialize)]
pub struct ChannelsQuery {
    /// One-based page number (default 1).
    pub page: Option<usize>,
    /// Page size (default 500).
    pub limit: Option<usize>,
}

/// Response of the event ingest endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Number of subscribers that accepted the event.
    pub delivered: usize,
}

/// Response of the channel ingest endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReport {
    /// Total channels stored for the session after the append.
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Report liveness and registry sizes.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions_issued": state.sessions.len(),
        "sessions_streaming": state.broker.active_sessions().len(),
    }))
}

/// Issue a new session token.
pub async fn create_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let token = state.sessions.create();
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: token.into(),
        }),
    )
}

/// Check whether a session token was issued by this server.
pub async fn validate_session(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Json<ValidateSessionResponse> {
    Json(ValidateSessionResponse {
        valid: state.sessions.validate(&session_id),
    })
}

/// Serve one page of a session's parsed channels.
pub async fn list_channels(
    Path(session_id): Path<String>,
    Query(query): Query<ChannelsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChunkResponse<Channel, GroupCount>>, ApiError> {
    let token = SessionToken::parse(&session_id)?;
    let page = state.channels.page(
        &token,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
    );
    Ok(Json(page))
}

/// Append channels parsed by the import pipeline.
pub async fn append_channels(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(channels): Json<Vec<Channel>>,
) -> Result<Json<AppendReport>, ApiError> {
    let token = SessionToken::parse(&session_id)?;
    let received = channels.len();
    let total = state.channels.append(&token, channels);
    info!(session = %token, received, total, "Channels ingested");
    Ok(Json(AppendReport { total }))
}

/// Broadcast an event supplied by the import pipeline.
///
/// The body is a wire payload (`{"type": "...", ...}`).
pub async fn publish_event(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<DeliveryReport>, ApiError> {
    let token = SessionToken::parse(&session_id)?;
    let event = SyncEvent::from_payload(None, body)?;
    let delivered = state.broker.broadcast(token.as_str(), event);
    Ok(Json(DeliveryReport { delivered }))
}
