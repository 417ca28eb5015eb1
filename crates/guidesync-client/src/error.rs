//! Error types for the guidesync client.
//!
//! Transport failures on the event stream are retried inside
//! [`StreamClient`](crate::stream::StreamClient) and never reach callers.
//! Everything here is a failure that is surfaced once.

use guidesync_types::{PayloadError, TokenError};

/// Errors that can occur during client operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The token is empty or a persisted placeholder.
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] TokenError),

    /// The server could not be reached, dropped the connection, or answered
    /// with a 5xx status.
    #[error("transport error: {0}")]
    Transport(String),

    /// A server payload did not have the expected shape.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A chunk request failed; scheduling of later chunks stopped.
    #[error("chunk {page} fetch failed: {message}")]
    ChunkFetch {
        /// One-based page that failed.
        page: usize,
        /// Description of the failure.
        message: String,
    },

    /// Too many validation attempts for one token inside the cooldown window.
    #[error("validation attempts exhausted for token, retry after cooldown")]
    ValidationBudgetExceeded,

    /// The server answered a session request with a 4xx status.
    #[error("session error: {0}")]
    Session(String),

    /// A load is already running for this session.
    #[error("load already in progress for session {0}")]
    LoadInProgress(String),

    /// Reading or writing persisted token state failed.
    #[error("token storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
