//! End-to-end client session: identity, event stream and channel loading.
//!
//! [`SyncSession`] resolves a token, opens the event stream for it and
//! loads the session's channels whenever the server announces that
//! channels are available or the import completed. Clearing the identity
//! tears the session down: the stream closes, any load is cancelled and
//! the cached channels are dropped.

use std::sync::{Arc, Mutex, PoisonError};

use guidesync_types::{Channel, EventKind, SessionToken, SyncEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{HttpApi, SessionApi};
use crate::cache::SessionCache;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::{IdentityEvent, SessionIdentity, ValidationPolicy};
use crate::loader::{ProgressFn, ProgressiveLoader};
use crate::store::{JsonFileTokenStore, MemoryTokenStore, TokenStore};
use crate::stream::{ListenerHandle, StreamClient};

/// Items loaded out of the total the server reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    /// Items cached.
    pub loaded: usize,
    /// Items reported by the server.
    pub total: usize,
}

impl LoadProgress {
    /// Whether every reported item is cached.
    pub const fn is_complete(&self) -> bool {
        self.loaded >= self.total
    }
}

/// State of one started session.
struct ActiveSession {
    token: SessionToken,
    cancel: CancellationToken,
    listeners: Vec<ListenerHandle>,
}

struct SessionInner {
    config: ClientConfig,
    identity: SessionIdentity,
    stream: StreamClient,
    loader: ProgressiveLoader<HttpApi>,
    progress: Arc<watch::Sender<Option<LoadProgress>>>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionInner {
    fn teardown(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.stream.disconnect();
        if let Some(session) = previous {
            session.cancel.cancel();
            for handle in session.listeners {
                let _ = handle.unsubscribe();
            }
            let _ = self.loader.cancel(&session.token);
            self.loader.cache().clear(&session.token);
            info!(token = %session.token, "Session torn down");
        }
        self.progress.send_replace(None);
    }

    async fn load_channels(&self, token: &SessionToken) {
        let progress = Arc::clone(&self.progress);
        let on_progress: ProgressFn = Arc::new(move |loaded, total| {
            progress.send_replace(Some(LoadProgress { loaded, total }));
        });

        let outcome = match self
            .loader
            .load_all_progressively(
                token,
                on_progress,
                self.config.chunk_size,
                self.config.max_chunks,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(ClientError::LoadInProgress(_)) => {
                debug!(%token, "Channel load already running");
                return;
            }
            Err(e) => {
                error!(%token, error = %e, "Channel load failed");
                return;
            }
        };

        if outcome.from_cache {
            self.progress.send_replace(Some(LoadProgress {
                loaded: outcome.items.len(),
                total: outcome.total,
            }));
        }
        if let Some(handle) = outcome.handle {
            match handle.wait().await {
                Ok(state) => debug!(%token, state = ?state, "Channel load stopped"),
                Err(e) => error!(%token, error = %e, "Channel load failed"),
            }
        }
    }
}

/// A client session following one import.
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    /// Build a session persisting its token in `store`.
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Self {
        let http = reqwest::Client::new();
        let api = Arc::new(HttpApi::with_client(http.clone(), config.server_url.clone()));
        let identity = SessionIdentity::new(
            Arc::clone(&api) as Arc<dyn SessionApi>,
            store,
            ValidationPolicy::from(&config),
        );
        let stream =
            StreamClient::with_client(http, config.server_url.clone(), config.reconnect_delay);
        let loader = ProgressiveLoader::new(api, Arc::new(SessionCache::new()), config.chunk_delay);
        let (progress, _) = watch::channel(None);

        Self {
            inner: Arc::new(SessionInner {
                config,
                identity,
                stream,
                loader,
                progress: Arc::new(progress),
                active: Mutex::new(None),
            }),
        }
    }

    /// Build a session with the token store named by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured token file cannot be opened.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let store: Arc<dyn TokenStore> = match &config.token_file {
            Some(path) => Arc::new(JsonFileTokenStore::open(path)?),
            None => Arc::new(MemoryTokenStore::new()),
        };
        Ok(Self::new(config, store))
    }

    /// Resolve the token, connect the event stream and arm channel loading.
    ///
    /// A stored token the server rejects is cleared and replaced. Calling
    /// `start` on a started session returns its token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be persisted.
    pub async fn start(&self) -> Result<SessionToken, ClientError> {
        if let Some(token) = self.token() {
            return Ok(token);
        }

        let token = self.resolve_token().await?;
        self.inner.stream.connect(token.as_str())?;

        let cancel = CancellationToken::new();
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let listeners: Vec<ListenerHandle> = [EventKind::ChannelsAvailable, EventKind::Complete]
            .into_iter()
            .map(|kind| {
                let triggers = triggers.clone();
                self.inner
                    .stream
                    .add_event_listener(kind, move |event: &SyncEvent| {
                        triggers.send(event.kind())?;
                        Ok(())
                    })
            })
            .collect();

        drop(tokio::spawn(run_loads(
            Arc::clone(&self.inner),
            token.clone(),
            trigger_rx,
            cancel.clone(),
        )));
        drop(tokio::spawn(watch_identity(
            Arc::clone(&self.inner),
            self.inner.identity.subscribe(),
            cancel.clone(),
        )));

        *self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ActiveSession {
            token: token.clone(),
            cancel,
            listeners,
        });
        info!(%token, "Session started");
        Ok(token)
    }

    /// Close the stream, cancel loading and drop cached channels.
    pub fn shutdown(&self) {
        self.inner.teardown();
    }

    /// Token of the started session, if any.
    pub fn token(&self) -> Option<SessionToken> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.token.clone())
    }

    /// The session's identity.
    pub fn identity(&self) -> &SessionIdentity {
        &self.inner.identity
    }

    /// The session's event stream, for registering listeners.
    pub fn stream(&self) -> &StreamClient {
        &self.inner.stream
    }

    /// Channels loaded so far.
    pub fn cache(&self) -> &SessionCache<Channel> {
        self.inner.loader.cache()
    }

    /// Watch channel load progress. `None` until a load reports.
    pub fn watch_progress(&self) -> watch::Receiver<Option<LoadProgress>> {
        self.inner.progress.subscribe()
    }

    async fn resolve_token(&self) -> Result<SessionToken, ClientError> {
        let identity = &self.inner.identity;
        let token = identity.get_or_create_token().await?;
        if token.is_local_fallback() {
            warn!(%token, "Running with a local session token");
            return Ok(token);
        }
        match identity.validate_token(&token).await {
            Ok(true) => Ok(token),
            Ok(false) | Err(ClientError::ValidationBudgetExceeded) => {
                info!(%token, "Stored session token is no longer valid");
                identity.clear_token()?;
                identity.get_or_create_token().await
            }
            Err(e @ (ClientError::Transport(_) | ClientError::Session(_))) => {
                warn!(%token, error = %e, "Could not validate session token, keeping it");
                Ok(token)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("token", &self.token())
            .field("stream", &self.inner.stream)
            .finish_non_exhaustive()
    }
}

/// Load channels each time a trigger event arrives, one load at a time.
async fn run_loads(
    inner: Arc<SessionInner>,
    token: SessionToken,
    mut triggers: mpsc::UnboundedReceiver<EventKind>,
    cancel: CancellationToken,
) {
    loop {
        let kind = tokio::select! {
            () = cancel.cancelled() => break,
            next = triggers.recv() => match next {
                Some(kind) => kind,
                None => break,
            },
        };
        info!(%token, trigger = %kind, "Loading channels");
        tokio::select! {
            () = cancel.cancelled() => break,
            () = inner.load_channels(&token) => {}
        }
    }
    debug!(%token, "Channel load trigger stopped");
}

/// Tear the session down when the identity is cleared.
async fn watch_identity(
    inner: Arc<SessionInner>,
    mut events: broadcast::Receiver<IdentityEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(IdentityEvent::Cleared) => {
                info!("Identity cleared, tearing down session");
                inner.teardown();
                break;
            }
            Ok(IdentityEvent::TokenChanged(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
