//! In-memory registry of server-issued session tokens.
//!
//! Backs the create-session and validate-session endpoints. Tokens minted
//! client-side in degraded mode are never recognized here, so a client
//! that validates a fallback token learns it must create a real one.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use guidesync_types::SessionToken;
use tracing::{debug, info};

/// Set of tokens issued by this server process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    issued: DashMap<SessionToken, DateTime<Utc>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue and record a new token.
    pub fn create(&self) -> SessionToken {
        let token = SessionToken::issue();
        let _ = self.issued.insert(token.clone(), Utc::now());
        info!(session = %token, "Session created");
        token
    }

    /// Whether `raw_token` was issued by this registry.
    pub fn validate(&self, raw_token: &str) -> bool {
        let valid = SessionToken::parse(raw_token)
            .is_ok_and(|token| self.issued.contains_key(&token));
        debug!(token = raw_token, valid, "Session validated");
        valid
    }

    /// When the session was issued, if it was.
    pub fn issued_at(&self, token: &SessionToken) -> Option<DateTime<Utc>> {
        self.issued.get(token).map(|at| *at)
    }

    /// Number of issued sessions.
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    /// Whether no sessions have been issued.
    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
