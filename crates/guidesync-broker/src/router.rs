//! Axum router construction for the broker API.
//!
//! Assembles all routes (REST + event stream) into a single [`Router`]
//! with CORS enabled so browser clients on other origins can connect.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::sse;
use crate::state::AppState;

/// Build the complete Axum router for the broker server.
///
/// The router includes:
/// - `GET /health` -- liveness
/// - `POST /api/sessions` -- issue a session token
/// - `GET /api/sessions/{id}/validate` -- validate a token
/// - `GET /api/sessions/{id}/events` -- server-sent event stream
/// - `POST /api/sessions/{id}/events` -- pipeline event ingest
/// - `GET /api/sessions/{id}/channels` -- paginated channels
/// - `POST /api/sessions/{id}/channels` -- pipeline channel ingest
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Session identity
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/{id}/validate", get(handlers::validate_session))
        // Event stream
        .route(
            "/api/sessions/{id}/events",
            get(sse::session_events).post(handlers::publish_event),
        )
        // Channel pages
        .route(
            "/api/sessions/{id}/channels",
            get(handlers::list_channels).post(handlers::append_channels),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
