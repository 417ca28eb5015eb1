//! Broker server binary for guidesync.
//!
//! Hosts the per-session event stream, session identity endpoints, the
//! paginated channel endpoint, and the ingest endpoints an out-of-process
//! import pipeline posts to.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `guidesync-config.yaml` (or `GUIDESYNC_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build shared broker state from the configured tunables
//! 4. Serve until `Ctrl-C`

mod config;
mod error;

use std::sync::Arc;

use guidesync_broker::{AppState, start_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerSettings;
use crate::error::ServerBinError;

/// Application entry point for the broker server.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the server
/// fails to bind.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config::config_path();
    let settings = ServerSettings::load_or_default(&path).map_err(ServerBinError::from)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        config = %path.display(),
        host = settings.server.host,
        port = settings.server.port,
        subscriber_buffer = settings.broker.subscriber_buffer,
        progress_min_interval_ms = settings.broker.progress_min_interval_ms,
        "guidesync-server starting"
    );

    let state = Arc::new(AppState::new(settings.broker_settings()));
    start_server(&settings.server_config(), state)
        .await
        .map_err(ServerBinError::from)?;

    info!("guidesync-server stopped");
    Ok(())
}
