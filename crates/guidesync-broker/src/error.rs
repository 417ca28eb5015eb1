//! Error types for the broker API server.
//!
//! [`ApiError`] unifies handler failure modes into a single enum that
//! converts into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use guidesync_types::{PayloadError, TokenError};

use crate::broker::BrokerError;

/// Errors that can occur in the broker API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The session token in the path was empty or a placeholder.
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] TokenError),

    /// An ingested event payload could not be decoded.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidToken(e) => Self::InvalidToken(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidToken(_) | Self::InvalidPayload(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
