//! Server-sent event stream of one session's import events.
//!
//! Clients connect to `GET /api/sessions/{id}/events` and receive every
//! event the import pipeline broadcasts for that session, starting with a
//! `connection` acknowledgement. The stream owns the subscriber's
//! [`Registration`](crate::broker::Registration), so when the client goes
//! away Axum drops the stream and the subscriber is unregistered.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures::Stream;
use tracing::debug;

use crate::broker::{ChannelSubscriber, SseFrame};
use crate::error::ApiError;
use crate::state::AppState;

/// Open an event stream for a session.
///
/// # Route
///
/// `GET /api/sessions/{id}/events`
pub async fn session_events(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (subscriber, rx) = ChannelSubscriber::new(state.settings.subscriber_buffer);
    let registration = state.broker.register(&session_id, Arc::new(subscriber))?;
    debug!(session = %registration.token(), subscriber_id = registration.id(), "Event stream opened");

    let stream = futures::stream::unfold((rx, registration), |(mut rx, registration)| async move {
        let frame = rx.recv().await?;
        Some((Ok(to_sse_event(frame)), (rx, registration)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Convert a broker frame into an Axum SSE event.
fn to_sse_event(frame: SseFrame) -> Event {
    Event::default().event(frame.event).data(frame.data)
}
