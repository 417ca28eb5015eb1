//! Event stream client with listener dispatch and supervised reconnect.
//!
//! [`StreamClient`] holds at most one connection to a session's event
//! stream. Frames are decoded into [`SyncEvent`]s and handed to the
//! registered listeners: those registered for the event's kind first, in
//! registration order, then those registered for every kind.
//!
//! A listener that returns an error or panics is logged and skipped; it
//! never prevents later listeners from running. Frames that fail to
//! decode are logged and dropped.
//!
//! When the connection fails or the server closes it, a supervisor task
//! waits a fixed delay and reconnects. Listeners live on the client, not
//! the connection, so they survive reconnects without being duplicated.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::StreamExt;
use guidesync_types::{EventEnvelope, EventKind, SessionToken, SyncEvent};
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;

/// Callback invoked for each dispatched event.
pub type Listener = Arc<dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync>;

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerKind {
    /// Every event, after kind-specific listeners.
    All,
    /// Only events of this kind.
    Kind(EventKind),
}

impl From<EventKind> for ListenerKind {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

/// Connection status of a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none scheduled.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Stream is open.
    Open,
    /// Connection lost; waiting to reconnect.
    Reconnecting,
}

struct ListenerEntry {
    id: u64,
    kind: ListenerKind,
    callback: Listener,
}

/// Registered listeners, shared between the client and its supervisor.
#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<ListenerEntry>>,
}

impl Listeners {
    fn add(&self, kind: ListenerKind, callback: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry { id, kind, callback });
        id
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run matching listeners for `event`. Returns how many ran cleanly.
    fn dispatch(&self, event: &SyncEvent) -> usize {
        let kind = event.kind();
        let (specific, all): (Vec<_>, Vec<_>) = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .filter(|entry| match &entry.kind {
                    ListenerKind::All => true,
                    ListenerKind::Kind(k) => *k == kind,
                })
                .map(|entry| (entry.kind == ListenerKind::All, Arc::clone(&entry.callback)))
                .partition(|(is_all, _)| !is_all)
        };

        let mut ok = 0usize;
        for (_, callback) in specific.into_iter().chain(all) {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => ok = ok.saturating_add(1),
                Ok(Err(e)) => warn!(kind = %kind, error = %e, "Event listener failed"),
                Err(_) => error!(kind = %kind, "Event listener panicked"),
            }
        }
        ok
    }

    /// Decode a raw stream message and dispatch it.
    fn dispatch_message(&self, message: &eventsource_stream::Event) {
        if message.data.trim().is_empty() {
            return;
        }
        let name = (!message.event.is_empty()).then_some(message.event.as_str());
        match EventEnvelope::decode(name, &message.data) {
            Ok(envelope) => {
                debug!(kind = %envelope.event.kind(), "Event received");
                let _ = self.dispatch(&envelope.event);
            }
            Err(e) => warn!(event = %message.event, error = %e, "Dropping undecodable event"),
        }
    }
}

/// Handle returned by [`StreamClient::add_event_listener`].
#[derive(Debug)]
pub struct ListenerHandle {
    listeners: Weak<Listeners>,
    id: u64,
}

impl ListenerHandle {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.id))
    }
}

struct ActiveStream {
    token: SessionToken,
    cancel: CancellationToken,
}

/// Client for a session's server-sent event stream.
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    reconnect_delay: Duration,
    listeners: Arc<Listeners>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Mutex<Option<ActiveStream>>,
}

impl StreamClient {
    /// Create a client for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, reconnect_delay)
    }

    /// Create a client reusing an existing `reqwest` client.
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            reconnect_delay,
            listeners: Arc::new(Listeners::default()),
            state: Arc::new(state),
            active: Mutex::new(None),
        }
    }

    /// Open the event stream for `token`.
    ///
    /// Connecting again with the same token while connected is a no-op.
    /// Connecting with a different token closes the current stream first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidToken`] for empty or placeholder
    /// tokens; no connection is attempted.
    pub fn connect(&self, token: &str) -> Result<(), ClientError> {
        let token = SessionToken::parse(token).inspect_err(|e| {
            warn!(error = %e, "Refusing to connect event stream");
        })?;

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            if current.token == token && !current.cancel.is_cancelled() {
                debug!(%token, "Event stream already connected");
                return Ok(());
            }
            current.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let supervisor = Supervisor {
            http: self.http.clone(),
            url: format!("{}/api/sessions/{token}/events", self.base_url),
            token: token.clone(),
            reconnect_delay: self.reconnect_delay,
            listeners: Arc::clone(&self.listeners),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
        };
        self.state.send_replace(ConnectionState::Connecting);
        drop(tokio::spawn(supervisor.run()));
        info!(%token, "Event stream connecting");

        *active = Some(ActiveStream { token, cancel });
        Ok(())
    }

    /// Close the stream and stop reconnecting. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = previous {
            stream.cancel.cancel();
            info!(token = %stream.token, "Event stream disconnected");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Register `callback` for `kind`.
    ///
    /// Listeners persist across reconnects and token changes.
    pub fn add_event_listener<F>(&self, kind: impl Into<ListenerKind>, callback: F) -> ListenerHandle
    where
        F: Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.listeners.add(kind.into(), Arc::new(callback));
        ListenerHandle {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Token of the current connection, if any.
    pub fn connected_token(&self) -> Option<SessionToken> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|stream| stream.token.clone())
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(stream) = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            stream.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("base_url", &self.base_url)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("listeners", &self.listener_count())
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

/// Owns one session's connection loop until cancelled.
struct Supervisor {
    http: reqwest::Client,
    url: String,
    token: SessionToken,
    reconnect_delay: Duration,
    listeners: Arc<Listeners>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        loop {
            self.read_stream().await;
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            debug!(
                token = %self.token,
                delay = ?self.reconnect_delay,
                "Event stream reconnect scheduled"
            );
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        debug!(token = %self.token, "Event stream supervisor stopped");
    }

    /// Read one connection until it fails, ends, or is cancelled.
    async fn read_stream(&self) {
        let mut source = match EventSource::new(self.http.get(&self.url)) {
            Ok(source) => source,
            Err(e) => {
                error!(url = %self.url, error = %e, "Cannot build event stream request");
                return;
            }
        };
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                next = source.next() => match next {
                    Some(Ok(Event::Open)) => {
                        info!(token = %self.token, "Event stream open");
                        self.set_state(ConnectionState::Open);
                    }
                    Some(Ok(Event::Message(message))) => self.listeners.dispatch_message(&message),
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        info!(token = %self.token, "Event stream closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(token = %self.token, error = %e, "Event stream transport error");
                        break;
                    }
                },
            }
        }
        source.close();
    }

    /// Publish `state` unless the supervisor was cancelled.
    ///
    /// The cancel check runs under the channel's write lock. Callers cancel
    /// before writing their own state, so a stale supervisor can never
    /// overwrite it.
    fn set_state(&self, state: ConnectionState) {
        let cancel = &self.cancel;
        let _ = self.state.send_if_modified(|current| {
            if cancel.is_cancelled() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}
