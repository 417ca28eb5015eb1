//! Shared application state for the broker API server.
//!
//! [`AppState`] owns the event broker, the session registry and the
//! channel store. It is constructed once, wrapped in [`Arc`](std::sync::Arc)
//! and injected into every handler via Axum's `State` extractor; the
//! import pipeline holds a clone of the same `Arc` to emit events.

use std::time::Duration;

use guidesync_types::SessionToken;

use crate::broker::EventBroker;
use crate::emitter::ImportEmitter;
use crate::sessions::SessionRegistry;
use crate::store::ChannelStore;

/// Default per-subscriber outbound queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default minimum spacing between progress broadcasts.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Frames buffered per subscriber before new frames are dropped.
    pub subscriber_buffer: usize,
    /// Minimum spacing between intermediate progress broadcasts.
    pub progress_min_interval: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            progress_min_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Shared state for the Axum application.
#[derive(Debug)]
pub struct AppState {
    /// Per-session subscriber registry.
    pub broker: EventBroker,
    /// Tokens issued by this server.
    pub sessions: SessionRegistry,
    /// Channels parsed per session.
    pub channels: ChannelStore,
    /// Broker tunables.
    pub settings: BrokerSettings,
}

impl AppState {
    /// Create state with the given settings.
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            broker: EventBroker::new(),
            sessions: SessionRegistry::new(),
            channels: ChannelStore::new(),
            settings,
        }
    }

    /// Create an emitter the import pipeline uses to report on `token`.
    pub fn emitter(&self, token: SessionToken) -> ImportEmitter {
        ImportEmitter::new(
            self.broker.clone(),
            token,
            self.settings.progress_min_interval,
        )
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}
