//! Broker startup helper for embedding next to an import pipeline.
//!
//! Provides [`spawn_broker`] which launches the broker HTTP server on a
//! background Tokio task. A process that also runs the import pipeline
//! keeps the shared [`AppState`] and emits events through it while the
//! server streams them to clients.
//!
//! # Usage
//!
//! ```rust,ignore
//! use guidesync_broker::{AppState, ServerConfig, spawn_broker};
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::default());
//! let handle = spawn_broker(ServerConfig::default(), Arc::clone(&state))?;
//! let emitter = state.emitter(token);
//! emitter.progress(10.0, "downloading playlist");
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the broker server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the broker HTTP server on a background Tokio task.
///
/// The address is validated eagerly so obvious misconfigurations surface
/// before the task is spawned. The returned handle resolves when the
/// server stops.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the configured address is invalid.
pub fn spawn_broker(
    config: ServerConfig,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, StartupError> {
    let addr = config.socket_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = crate::server::start_server(&config, state).await {
            tracing::error!(error = %e, "Broker server exited with error");
        }
    });

    tracing::info!(%addr, "Broker server spawned on background task");

    Ok(handle)
}
