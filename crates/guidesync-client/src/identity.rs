//! Session identity: resolving, validating and clearing the session token.
//!
//! The token is persisted under every key in [`TOKEN_KEYS`] so stores
//! written by older clients are still picked up. Resolution prefers a
//! stored token, then a server-issued one, then a locally generated
//! fallback so the client keeps working while the server is unreachable.
//! A stored local token is provisional: each resolution retries the
//! server and replaces it once a server token is issued.
//!
//! # State machine
//!
//! ```text
//! Unknown -> Validating -> Valid | Invalid
//! Validating -> Unknown            (request failed, verdict unknown)
//! Unknown | Invalid -> Creating -> Valid
//! ```
//!
//! `Valid` holds until [`SessionIdentity::clear_token`] resets to `Unknown`.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use guidesync_types::SessionToken;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::store::TokenStore;

/// Storage keys holding the token, in lookup order.
///
/// The first key is canonical; the rest were written by earlier clients.
pub const TOKEN_KEYS: [&str; 3] = ["sessionToken", "session_token", "guidesync.session"];

/// Capacity of the identity notification channel.
const EVENT_CAPACITY: usize = 16;

/// Where the identity is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token has been checked yet.
    Unknown,
    /// A validation request is in flight.
    Validating,
    /// The current token was accepted by the server or freshly issued.
    Valid,
    /// The last validated token was rejected.
    Invalid,
    /// A new token is being obtained.
    Creating,
}

/// Notifications for in-process consumers of the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A token was adopted and persisted.
    TokenChanged(SessionToken),
    /// The token was wiped; consumers must drop any state tied to it.
    Cleared,
}

/// Limits on repeated validation of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Attempts allowed inside one window.
    pub max_attempts: u32,
    /// Window length.
    pub cooldown: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(10),
        }
    }
}

impl From<&ClientConfig> for ValidationPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.validation_max_attempts,
            cooldown: config.validation_cooldown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    window_start: Instant,
}

/// Resolves and tracks the session token for this client.
pub struct SessionIdentity {
    api: Arc<dyn SessionApi>,
    store: Arc<dyn TokenStore>,
    policy: ValidationPolicy,
    attempts: DashMap<SessionToken, Attempts>,
    current: RwLock<Option<SessionToken>>,
    create_lock: Mutex<()>,
    state: watch::Sender<TokenState>,
    events: broadcast::Sender<IdentityEvent>,
}

impl SessionIdentity {
    /// Create an identity backed by `api` and persisted in `store`.
    pub fn new(
        api: Arc<dyn SessionApi>,
        store: Arc<dyn TokenStore>,
        policy: ValidationPolicy,
    ) -> Self {
        let (state, _) = watch::channel(TokenState::Unknown);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            api,
            store,
            policy,
            attempts: DashMap::new(),
            current: RwLock::new(None),
            create_lock: Mutex::new(()),
            state,
            events,
        }
    }

    /// Return the stored token, or obtain and persist a new one.
    ///
    /// Empty and placeholder values in storage are treated as absent. If
    /// the server cannot issue a token a local one is generated instead.
    /// A stored local token triggers another create request and is kept
    /// only while that request fails.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the token cannot be persisted.
    pub async fn get_or_create_token(&self) -> Result<SessionToken, ClientError> {
        let _guard = self.create_lock.lock().await;

        let stored = self.stored_token()?;
        if let Some(token) = &stored {
            if !token.is_local_fallback() {
                self.adopt(token)?;
                return Ok(token.clone());
            }
            debug!(%token, "Stored token is local, retrying server session");
        }

        self.state.send_replace(TokenState::Creating);
        let token = match self.api.create_session().await {
            Ok(token) => {
                info!(%token, "Obtained session token from server");
                token
            }
            Err(e) => {
                let token = stored.unwrap_or_else(SessionToken::local_fallback);
                warn!(error = %e, %token, "Session create failed, using local token");
                token
            }
        };
        self.adopt(&token)?;
        self.state.send_replace(TokenState::Valid);
        Ok(token)
    }

    /// Validate `token` against the server.
    ///
    /// At most [`ValidationPolicy::max_attempts`] requests are made per
    /// token per cooldown window; a successful validation resets the
    /// count. A failed request counts as an attempt but is not a verdict:
    /// the state returns to `Unknown` and the error is passed on.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ValidationBudgetExceeded`] without contacting
    /// the server when the budget for this window is spent. Callers treat
    /// it the same as an invalid token. Returns [`ClientError::Transport`]
    /// or [`ClientError::Session`] when the request itself failed.
    pub async fn validate_token(&self, token: &SessionToken) -> Result<bool, ClientError> {
        if *self.state.borrow() == TokenState::Valid && self.current_token().as_ref() == Some(token)
        {
            return Ok(true);
        }

        if let Err(e) = self.acquire_attempt(token) {
            debug!(%token, "Validation budget exhausted");
            self.state.send_replace(TokenState::Invalid);
            return Err(e);
        }

        self.state.send_replace(TokenState::Validating);
        let valid = match self.api.validate_session(token).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(%token, error = %e, "Token validation request failed");
                self.state.send_replace(TokenState::Unknown);
                return Err(e);
            }
        };

        if valid {
            let _ = self.attempts.remove(token);
            self.state.send_replace(TokenState::Valid);
        } else {
            info!(%token, "Session token rejected");
            self.state.send_replace(TokenState::Invalid);
        }
        Ok(valid)
    }

    /// Wipe the token from every key and tell consumers to drop it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if a key cannot be removed. Keys
    /// before the failing one are already cleared.
    pub fn clear_token(&self) -> Result<(), ClientError> {
        for key in TOKEN_KEYS {
            self.store.remove(key)?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.attempts.clear();
        self.state.send_replace(TokenState::Unknown);
        let _ = self.events.send(IdentityEvent::Cleared);
        info!("Session token cleared");
        Ok(())
    }

    /// The token most recently adopted by this identity.
    pub fn current_token(&self) -> Option<SessionToken> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current lifecycle state.
    pub fn token_state(&self) -> TokenState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<TokenState> {
        self.state.subscribe()
    }

    /// Receive identity notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    /// First usable token across [`TOKEN_KEYS`].
    fn stored_token(&self) -> Result<Option<SessionToken>, ClientError> {
        for key in TOKEN_KEYS {
            let Some(raw) = self.store.get(key)? else {
                continue;
            };
            match SessionToken::parse(&raw) {
                Ok(token) => return Ok(Some(token)),
                Err(e) => debug!(key, error = %e, "Ignoring stored token"),
            }
        }
        Ok(None)
    }

    /// Persist `token` under every key and notify if it is new.
    fn adopt(&self, token: &SessionToken) -> Result<(), ClientError> {
        for key in TOKEN_KEYS {
            self.store.set(key, token.as_str())?;
        }
        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref() == Some(token) {
                false
            } else {
                *current = Some(token.clone());
                true
            }
        };
        if changed {
            let _ = self.events.send(IdentityEvent::TokenChanged(token.clone()));
        }
        Ok(())
    }

    fn acquire_attempt(&self, token: &SessionToken) -> Result<(), ClientError> {
        let now = Instant::now();
        let mut entry = self.attempts.entry(token.clone()).or_insert(Attempts {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= self.policy.cooldown {
            *entry = Attempts {
                count: 0,
                window_start: now,
            };
        }
        if entry.count >= self.policy.max_attempts {
            return Err(ClientError::ValidationBudgetExceeded);
        }
        entry.count = entry.count.saturating_add(1);
        Ok(())
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("policy", &self.policy)
            .field("current", &self.current_token())
            .field("state", &self.token_state())
            .finish_non_exhaustive()
    }
}
