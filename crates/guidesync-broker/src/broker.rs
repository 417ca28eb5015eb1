//! Per-session event broker.
//!
//! [`EventBroker`] maps each session token to the set of subscribers
//! currently streaming that session's import events. The import pipeline
//! calls [`EventBroker::broadcast`]; connection handlers call
//! [`EventBroker::register`] and hold the returned [`Registration`] for
//! as long as the connection lives.
//!
//! # Concurrency
//!
//! The registry is a [`DashMap`], so registration, removal and broadcast
//! run concurrently from connection tasks and pipeline threads. Broadcast
//! copies the target session's subscribers out of the map before pushing,
//! so a subscriber disconnecting mid-broadcast never invalidates the
//! iteration and no map lock is held while pushing.
//!
//! Delivery is best-effort and fire-and-forget: [`Subscriber::push`] must
//! not block, and a failing subscriber never prevents delivery to the
//! others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use guidesync_types::{
    ConnectionAck, DEFAULT_KIND, EventEnvelope, SessionToken, SyncEvent, TokenError,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Identifier of one subscriber within the broker.
pub type SubscriberId = u64;

/// Errors returned by broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The session token was empty or a placeholder.
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Errors a subscriber can report when a frame cannot be delivered.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The subscriber's outbound queue is full (slow consumer).
    #[error("subscriber queue is full")]
    Full,

    /// The subscriber's connection is gone.
    #[error("subscriber disconnected")]
    Closed,

    /// Any other delivery failure.
    #[error("push failed: {0}")]
    Failed(String),
}

/// One serialized event frame.
///
/// The HTTP layer renders it in the line-oriented push-stream format: a
/// kind line, a payload line, and a blank terminator line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event kind (the `event:` line).
    pub event: String,
    /// JSON payload (the `data:` line).
    pub data: String,
}

impl SseFrame {
    /// Serialize an envelope into a frame.
    ///
    /// Kind names that are empty or contain line breaks are replaced with
    /// [`DEFAULT_KIND`] so they cannot corrupt the frame.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        let kind = envelope.event.kind();
        let name = kind.as_str();
        let event = if name.is_empty() || name.contains(['\n', '\r']) {
            DEFAULT_KIND.to_owned()
        } else {
            name.to_owned()
        };
        Ok(Self {
            event,
            data: envelope.to_json()?,
        })
    }

}

/// A live push connection that can receive frames.
///
/// Implementations must return promptly; the broker calls `push` on the
/// broadcasting thread.
pub trait Subscriber: Send + Sync {
    /// Deliver one frame.
    fn push(&self, frame: &SseFrame) -> Result<(), PushError>;
}

/// [`Subscriber`] backed by a bounded Tokio channel.
///
/// The receiving half is drained by the connection's stream. A full
/// queue drops the frame rather than blocking the broadcaster.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<SseFrame>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiver its connection drains.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SseFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn push(&self, frame: &SseFrame) -> Result<(), PushError> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

type SubscriberSet = HashMap<SubscriberId, Arc<dyn Subscriber>>;

struct Inner {
    sessions: DashMap<SessionToken, SubscriberSet>,
    next_id: AtomicU64,
}

/// Fan-out registry of session subscribers.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<Inner>,
}

impl EventBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber for a session.
    ///
    /// On success the subscriber immediately receives a `connection`
    /// acknowledgement (and no other subscriber does). The returned
    /// [`Registration`] removes the subscriber when dropped.
    ///
    /// An invalid token is rejected without touching the registry.
    pub fn register(
        &self,
        raw_token: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Registration, BrokerError> {
        let token = SessionToken::parse(raw_token).map_err(|e| {
            warn!(token = raw_token, error = %e, "Rejected subscriber registration");
            BrokerError::InvalidToken(e)
        })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscribers = {
            let mut set = self.inner.sessions.entry(token.clone()).or_default();
            let _ = set.insert(id, Arc::clone(&subscriber));
            set.len()
        };
        info!(session = %token, subscriber_id = id, subscribers, "Subscriber registered");

        let ack = EventEnvelope::now(SyncEvent::Connection(ConnectionAck {
            token: token.to_string(),
        }));
        match SseFrame::from_envelope(&ack) {
            Ok(frame) => {
                if let Err(e) = subscriber.push(&frame) {
                    warn!(session = %token, subscriber_id = id, error = %e, "Failed to send connection ack");
                }
            }
            Err(e) => error!(session = %token, error = %e, "Failed to serialize connection ack"),
        }

        Ok(Registration {
            broker: self.clone(),
            token,
            id,
        })
    }

    /// Remove a subscriber, dropping the session entry once it is empty.
    fn unregister(&self, token: &SessionToken, id: SubscriberId) {
        let removed = self
            .inner
            .sessions
            .get_mut(token)
            .is_some_and(|mut set| set.remove(&id).is_some());
        let session_removed = self
            .inner
            .sessions
            .remove_if(token, |_, set| set.is_empty())
            .is_some();
        debug!(session = %token, subscriber_id = id, removed, session_removed, "Subscriber unregistered");
    }

    /// Push an event to every current subscriber of a session.
    ///
    /// Returns the number of subscribers that accepted the frame. An
    /// invalid token, a session without subscribers, a serialization
    /// failure, or failing subscribers are logged and never surface as
    /// errors.
    pub fn broadcast(&self, raw_token: &str, event: SyncEvent) -> usize {
        let Ok(token) = SessionToken::parse(raw_token) else {
            warn!(token = raw_token, "Dropped broadcast to invalid session token");
            return 0;
        };

        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .inner
            .sessions
            .get(&token)
            .map(|set| set.iter().map(|(id, s)| (*id, Arc::clone(s))).collect())
            .unwrap_or_default();

        if targets.is_empty() {
            warn!(
                session = %token,
                kind = %event.kind(),
                active_sessions = ?self.active_sessions(),
                "No subscribers for session, broadcast dropped"
            );
            return 0;
        }

        let envelope = EventEnvelope::now(event);
        let frame = match SseFrame::from_envelope(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(session = %token, error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered: usize = 0;
        for (id, subscriber) in &targets {
            match subscriber.push(&frame) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(e) => warn!(session = %token, subscriber_id = id, error = %e, "Failed to push event"),
            }
        }
        debug!(
            session = %token,
            kind = frame.event,
            delivered,
            subscribers = targets.len(),
            "Event broadcast"
        );
        delivered
    }

    /// Tokens that currently have at least one subscriber.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        tokens.sort_unstable();
        tokens
    }

    /// Number of subscribers registered for a session.
    pub fn subscriber_count(&self, raw_token: &str) -> usize {
        SessionToken::parse(raw_token)
            .ok()
            .and_then(|token| self.inner.sessions.get(&token).map(|set| set.len()))
            .unwrap_or(0)
    }

    /// Whether the registry holds an entry for the session.
    pub fn has_session(&self, raw_token: &str) -> bool {
        SessionToken::parse(raw_token).is_ok_and(|token| self.inner.sessions.contains_key(&token))
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

/// Keeps a subscriber registered; unregisters it on drop.
///
/// This is the disconnect hook: the connection's stream owns the
/// registration, so closing the connection removes the subscriber.
pub struct Registration {
    broker: EventBroker,
    token: SessionToken,
    id: SubscriberId,
}

impl Registration {
    /// The session this registration belongs to.
    pub const fn token(&self) -> &SessionToken {
        &self.token
    }

    /// The subscriber's identifier.
    pub const fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.broker.unregister(&self.token, self.id);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("token", &self.token)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<SseFrame>>,
    }

    impl Recorder {
        fn frames(&self) -> Vec<SseFrame> {
            self.frames.lock().map(|f| f.clone()).unwrap_or_default()
        }
    }

    impl Subscriber for Recorder {
        fn push(&self, frame: &SseFrame) -> Result<(), PushError> {
            if let Ok(mut frames) = self.frames.lock() {
                frames.push(frame.clone());
            }
            Ok(())
        }
    }

    struct Failing;

    impl Subscriber for Failing {
        fn push(&self, _frame: &SseFrame) -> Result<(), PushError> {
            Err(PushError::Failed(String::from("socket reset")))
        }
    }

    /// Drops another subscriber's registration while a broadcast is being
    /// pushed to it. The connection ack delivered at registration is ignored.
    struct Disconnector {
        victim: Mutex<Option<Registration>>,
    }

    impl Subscriber for Disconnector {
        fn push(&self, frame: &SseFrame) -> Result<(), PushError> {
            if frame.event == "connection" {
                return Ok(());
            }
            if let Ok(mut victim) = self.victim.lock() {
                drop(victim.take());
            }
            Ok(())
        }
    }

    #[test]
    fn broadcast_without_subscribers_is_noop() {
        let broker = EventBroker::new();
        assert_eq!(broker.broadcast("abc123", SyncEvent::progress(50.0, "")), 0);
        assert!(!broker.has_session("abc123"));
    }

    #[test]
    fn broadcast_after_register_delivers_one_frame() {
        let broker = EventBroker::new();
        assert_eq!(broker.broadcast("abc123", SyncEvent::progress(50.0, "")), 0);

        let a = Arc::new(Recorder::default());
        let _reg = broker.register("abc123", a.clone());
        assert_eq!(broker.broadcast("abc123", SyncEvent::progress(50.0, "")), 1);

        let frames = a.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames.first().map(|f| f.event.as_str()), Some("connection"));
        let progress = frames.get(1).cloned();
        assert_eq!(progress.as_ref().map(|f| f.event.as_str()), Some("progress"));
        assert!(progress.is_some_and(|f| f.data.contains("\"percentage\":50")));
    }

    #[test]
    fn ack_goes_only_to_new_subscriber() {
        let broker = EventBroker::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let _a = broker.register("s1", first.clone());
        let _b = broker.register("s1", second.clone());
        assert_eq!(first.frames().len(), 1);
        assert_eq!(second.frames().len(), 1);
        assert!(first.frames().iter().all(|f| f.data.contains("\"token\":\"s1\"")));
    }

    #[test]
    fn invalid_token_registration_has_no_side_effects() {
        let broker = EventBroker::new();
        let sub = Arc::new(Recorder::default());
        assert!(broker.register("undefined", sub.clone()).is_err());
        assert!(broker.register("", sub.clone()).is_err());
        assert!(broker.active_sessions().is_empty());
        assert!(sub.frames().is_empty());
    }

    #[test]
    fn last_unregister_removes_session_entry() {
        let broker = EventBroker::new();
        let a = broker.register("s1", Arc::new(Recorder::default())).ok();
        let b = broker.register("s1", Arc::new(Recorder::default())).ok();
        assert_eq!(broker.subscriber_count("s1"), 2);

        drop(a);
        assert_eq!(broker.subscriber_count("s1"), 1);
        assert!(broker.has_session("s1"));

        drop(b);
        assert!(!broker.has_session("s1"));
        assert!(broker.active_sessions().is_empty());
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let broker = EventBroker::new();
        let a = Arc::new(Recorder::default());
        let c = Arc::new(Recorder::default());
        let _ra = broker.register("s1", a.clone());
        let _rb = broker.register("s1", Arc::new(Failing));
        let _rc = broker.register("s1", c.clone());

        let delivered = broker.broadcast("s1", SyncEvent::progress(10.0, "m3u"));
        assert_eq!(delivered, 2);
        assert_eq!(a.frames().len(), 2);
        assert_eq!(c.frames().len(), 2);
    }

    #[test]
    fn disconnect_during_broadcast_is_tolerated() {
        let broker = EventBroker::new();
        let victim = broker.register("s1", Arc::new(Recorder::default())).ok();
        let disconnector = Arc::new(Disconnector {
            victim: Mutex::new(victim),
        });
        let _reg = broker.register("s1", disconnector);
        assert_eq!(broker.subscriber_count("s1"), 2);

        // Both were snapshotted before the push loop started.
        let delivered = broker.broadcast("s1", SyncEvent::progress(1.0, ""));
        assert!(delivered >= 1);
        assert_eq!(broker.subscriber_count("s1"), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let broker = EventBroker::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let _ra = broker.register("s1", a.clone());
        let _rb = broker.register("s2", b.clone());
        let _ = broker.broadcast("s1", SyncEvent::progress(5.0, ""));
        assert_eq!(a.frames().len(), 2);
        assert_eq!(b.frames().len(), 1);
        assert_eq!(broker.active_sessions(), vec![String::from("s1"), String::from("s2")]);
    }

    #[test]
    fn unknown_kind_with_line_break_becomes_message() {
        let envelope = EventEnvelope::now(SyncEvent::Other {
            kind: String::from("bad\nkind"),
            payload: serde_json::json!({}),
        });
        let frame = SseFrame::from_envelope(&envelope).ok();
        assert_eq!(frame.map(|f| f.event), Some(String::from(DEFAULT_KIND)));
    }

    #[tokio::test]
    async fn channel_subscriber_reports_full_and_closed() {
        let (sub, mut rx) = ChannelSubscriber::new(1);
        let frame = SseFrame {
            event: String::from("progress"),
            data: String::from("{}"),
        };
        assert!(sub.push(&frame).is_ok());
        assert!(matches!(sub.push(&frame), Err(PushError::Full)));
        assert_eq!(rx.recv().await, Some(frame.clone()));
        drop(rx);
        assert!(matches!(sub.push(&frame), Err(PushError::Closed)));
    }
}
