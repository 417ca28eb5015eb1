//! Session event broker for guidesync imports.
//!
//! This crate provides the server half of guidesync:
//!
//! - **[`EventBroker`]** -- per-session fan-out of import events to every
//!   live subscriber, with partial-failure isolation
//! - **[`ImportEmitter`]** -- the handle the import pipeline uses to
//!   report progress, data availability, completion and failure
//! - **Axum router** -- server-sent event stream per session, session
//!   create/validate endpoints, paginated channels, and pipeline ingest
//!   endpoints for out-of-process importers
//!
//! # Architecture
//!
//! All state lives in an [`AppState`] owned by the process and injected
//! into handlers. Event streams register a subscriber backed by a bounded
//! channel; broadcasts never block on a slow client and a dropped client
//! unregisters itself when Axum drops its stream.

pub mod broker;
pub mod emitter;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod sessions;
pub mod sse;
pub mod startup;
pub mod state;
pub mod store;

// Re-export primary types for convenience.
pub use broker::{
    BrokerError, ChannelSubscriber, EventBroker, PushError, Registration, SseFrame, Subscriber,
};
pub use emitter::ImportEmitter;
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use startup::{StartupError, spawn_broker};
pub use state::{AppState, BrokerSettings};
