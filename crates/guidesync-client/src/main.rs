//! Terminal follower for a guidesync import.
//!
//! Resolves (or creates) a session token, opens the session's event
//! stream and logs import progress until the import finishes and every
//! channel is loaded, or until `Ctrl-C`.
//!
//! Configuration comes from the environment; see
//! [`ClientConfig::from_env`](guidesync_client::ClientConfig::from_env).

use guidesync_client::{ClientConfig, ListenerKind, SyncSession};
use guidesync_types::SyncEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How a followed import ended.
enum Finish {
    Complete,
    Failed(String),
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is missing or the session cannot start.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config = ClientConfig::from_env()?;
    info!(
        server_url = config.server_url,
        chunk_size = config.chunk_size,
        max_chunks = config.max_chunks,
        reconnect_delay_ms = config.reconnect_delay.as_millis(),
        "guidesync-watch starting"
    );

    let session = SyncSession::from_config(config)?;
    let (finished, mut finished_rx) = mpsc::unbounded_channel();
    let _log = session
        .stream()
        .add_event_listener(ListenerKind::All, move |event: &SyncEvent| {
            match event {
                SyncEvent::Connection(ack) => info!(token = ack.token, "Stream acknowledged"),
                SyncEvent::Progress(p) => info!(percentage = p.percentage, "{}", p.message),
                SyncEvent::ChannelsAvailable(c) => info!(count = c.count, "Channels available"),
                SyncEvent::GuideSourceAvailable(g) => {
                    info!(url = g.url, name = ?g.name, "Guide source available");
                }
                SyncEvent::Complete(_) => finished.send(Finish::Complete)?,
                SyncEvent::Error(e) => finished.send(Finish::Failed(e.message.clone()))?,
                SyncEvent::Other { kind, .. } => debug!(kind, "Unhandled event"),
            }
            Ok(())
        });

    let token = session.start().await?;
    info!(%token, "Following import");

    let mut progress = session.watch_progress();
    tokio::select! {
        finish = finished_rx.recv() => match finish {
            Some(Finish::Complete) => {
                info!("Import complete, waiting for channels");
                let loaded = progress
                    .wait_for(|p| p.is_some_and(|p| p.is_complete()))
                    .await
                    .ok()
                    .and_then(|p| *p);
                if let Some(p) = loaded {
                    info!(loaded = p.loaded, total = p.total, "Channels loaded");
                }
            }
            Some(Finish::Failed(reason)) => warn!(reason, "Import failed"),
            None => {}
        },
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Interrupted");
        }
    }

    session.shutdown();
    Ok(())
}
