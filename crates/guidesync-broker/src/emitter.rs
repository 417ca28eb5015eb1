//! Pipeline-facing handle for emitting one session's import events.
//!
//! The import pipeline decides *when* to report; [`ImportEmitter`] only
//! shapes the events and rate-limits progress so a parser reporting per
//! record does not flood subscribers. Progress at 0% and 100% always goes
//! through.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use guidesync_types::{
    ChannelsAvailable, Complete, GuideSourceAvailable, ImportFailure, SessionToken, SyncEvent,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::broker::EventBroker;

/// Emits import events for a single session through an [`EventBroker`].
#[derive(Debug)]
pub struct ImportEmitter {
    broker: EventBroker,
    token: SessionToken,
    min_progress_interval: Duration,
    last_progress: Mutex<Option<Instant>>,
}

impl ImportEmitter {
    /// Create an emitter bound to `token`.
    pub const fn new(broker: EventBroker, token: SessionToken, min_progress_interval: Duration) -> Self {
        Self {
            broker,
            token,
            min_progress_interval,
            last_progress: Mutex::new(None),
        }
    }

    /// The session this emitter reports for.
    pub const fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Report overall progress.
    ///
    /// `percentage` is clamped to `0..=100`. Intermediate updates arriving
    /// faster than the configured interval are skipped and return 0.
    pub fn progress(&self, percentage: f64, message: impl Into<String>) -> usize {
        let percentage = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        let boundary = percentage <= 0.0 || percentage >= 100.0;

        {
            let mut last = self
                .last_progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let throttled = last
                .is_some_and(|at| now.saturating_duration_since(at) < self.min_progress_interval);
            if throttled && !boundary {
                debug!(session = %self.token, percentage, "Progress update throttled");
                return 0;
            }
            *last = Some(now);
        }

        self.broker
            .broadcast(self.token.as_str(), SyncEvent::progress(percentage, message))
    }

    /// Announce that `count` channels are ready to be loaded.
    pub fn channels_available(&self, count: usize) -> usize {
        self.broker.broadcast(
            self.token.as_str(),
            SyncEvent::ChannelsAvailable(ChannelsAvailable {
                count,
                data: Value::Null,
            }),
        )
    }

    /// Announce that a program-guide source finished parsing.
    pub fn guide_source_available(&self, url: &str, data: Value) -> usize {
        self.broker.broadcast(
            self.token.as_str(),
            SyncEvent::GuideSourceAvailable(GuideSourceAvailable {
                url: url.to_owned(),
                name: Some(source_name(url)),
                data,
            }),
        )
    }

    /// Announce that the import finished.
    pub fn complete(&self, data: Value) -> usize {
        self.broker
            .broadcast(self.token.as_str(), SyncEvent::Complete(Complete { data }))
    }

    /// Announce that the import failed.
    pub fn error(&self, message: impl Into<String>) -> usize {
        self.broker.broadcast(
            self.token.as_str(),
            SyncEvent::Error(ImportFailure {
                message: message.into(),
            }),
        )
    }
}

/// Display name for a guide source: the last path segment of its URL.
///
/// Query strings and fragments are ignored. Falls back to the input when
/// no segment can be found.
pub fn source_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.ends_with(':'))
        .map_or_else(|| url.to_owned(), ToOwned::to_owned)
}
