//! Import events pushed from the broker to session subscribers.
//!
//! [`SyncEvent`] is a closed sum type over every kind the import pipeline
//! emits, plus an [`SyncEvent::Other`] arm so a client built against an
//! older set of kinds still dispatches newer ones generically.
//!
//! # Wire format
//!
//! Each event travels as a JSON object carrying its payload fields plus
//! `type` (the kind name) and `timestamp` (RFC 3339):
//!
//! ```text
//! {"type":"progress","percentage":50.0,"message":"parsing","timestamp":"..."}
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Kind name used when an event carries no kind at all.
pub const DEFAULT_KIND: &str = "message";

/// Errors raised while decoding an event payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload was not valid JSON.
    #[error("malformed event JSON: {0}")]
    Json(#[source] serde_json::Error),

    /// The JSON did not match the shape expected for its kind.
    #[error("payload does not match kind {kind}: {source}")]
    Shape {
        /// The kind the payload claimed to be.
        kind: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Synthetic acknowledgement sent to a subscriber right after it registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionAck {
    /// The session token the stream is scoped to.
    pub token: String,
}

/// Overall import progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Progress {
    /// Completion in the range `0..=100`.
    pub percentage: f64,
    /// Human-readable description of the current step.
    #[serde(default)]
    pub message: String,
}

/// A batch of playlist channels has been parsed and can be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChannelsAvailable {
    /// Number of channels parsed so far.
    pub count: usize,
    /// Optional inline data supplied by the pipeline.
    #[serde(default)]
    pub data: Value,
}

/// One program-guide source finished parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GuideSourceAvailable {
    /// Source URL as configured for the import.
    pub url: String,
    /// Display name, usually the last path segment of the URL.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional inline data supplied by the pipeline.
    #[serde(default)]
    pub data: Value,
}

/// The import finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Complete {
    /// Summary data supplied by the pipeline.
    #[serde(default)]
    pub data: Value,
}

/// The import failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ImportFailure {
    /// Description of the failure.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Discriminant of a [`SyncEvent`], used to scope listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Stream established.
    Connection,
    /// Progress update.
    Progress,
    /// Channels can be loaded.
    ChannelsAvailable,
    /// A guide source finished.
    GuideSourceAvailable,
    /// Import finished.
    Complete,
    /// Import failed.
    Error,
    /// A kind this build does not know about.
    Other(String),
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connection => "connection",
            Self::Progress => "progress",
            Self::ChannelsAvailable => "channels_available",
            Self::GuideSourceAvailable => "guide_source_available",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Other(name) if name.is_empty() => DEFAULT_KIND,
            Self::Other(name) => name,
        }
    }

    /// Map a wire name onto a kind. Unknown names become [`EventKind::Other`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "connection" => Self::Connection,
            "progress" => Self::Progress,
            "channels_available" => Self::ChannelsAvailable,
            "guide_source_available" => Self::GuideSourceAvailable,
            "complete" => Self::Complete,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event emitted by the import pipeline for one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Stream established.
    Connection(ConnectionAck),
    /// Progress update.
    Progress(Progress),
    /// Channels can be loaded.
    ChannelsAvailable(ChannelsAvailable),
    /// A guide source finished.
    GuideSourceAvailable(GuideSourceAvailable),
    /// Import finished.
    Complete(Complete),
    /// Import failed.
    Error(ImportFailure),
    /// Forward-compatible catch-all for unknown kinds.
    Other {
        /// Wire name of the kind.
        kind: String,
        /// Raw payload as received.
        payload: Value,
    },
}

impl SyncEvent {
    /// Shorthand for a progress event.
    pub fn progress(percentage: f64, message: impl Into<String>) -> Self {
        Self::Progress(Progress {
            percentage,
            message: message.into(),
        })
    }

    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connection(_) => EventKind::Connection,
            Self::Progress(_) => EventKind::Progress,
            Self::ChannelsAvailable(_) => EventKind::ChannelsAvailable,
            Self::GuideSourceAvailable(_) => EventKind::GuideSourceAvailable,
            Self::Complete(_) => EventKind::Complete,
            Self::Error(_) => EventKind::Error,
            Self::Other { kind, .. } => EventKind::Other(kind.clone()),
        }
    }

    /// Whether this event ends the import (success or failure).
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// Serialize the payload fields into a JSON value (without `type`).
    fn payload_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Connection(p) => serde_json::to_value(p),
            Self::Progress(p) => serde_json::to_value(p),
            Self::ChannelsAvailable(p) => serde_json::to_value(p),
            Self::GuideSourceAvailable(p) => serde_json::to_value(p),
            Self::Complete(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
            Self::Other { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Decode a payload object into a typed event.
    ///
    /// The kind is taken from the payload's `type` field, then its `kind`
    /// field, then `hint` (typically the stream frame's event name).
    pub fn from_payload(hint: Option<&str>, payload: Value) -> Result<Self, PayloadError> {
        let kind_name = payload
            .get("type")
            .or_else(|| payload.get("kind"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .or_else(|| hint.map(ToOwned::to_owned))
            .unwrap_or_else(|| DEFAULT_KIND.to_owned());

        let event = match EventKind::from_name(&kind_name) {
            EventKind::Connection => Self::Connection(typed(&kind_name, payload)?),
            EventKind::Progress => Self::Progress(typed(&kind_name, payload)?),
            EventKind::ChannelsAvailable => Self::ChannelsAvailable(typed(&kind_name, payload)?),
            EventKind::GuideSourceAvailable => {
                Self::GuideSourceAvailable(typed(&kind_name, payload)?)
            }
            EventKind::Complete => Self::Complete(typed(&kind_name, payload)?),
            EventKind::Error => Self::Error(typed(&kind_name, payload)?),
            EventKind::Other(kind) => Self::Other { kind, payload },
        };
        Ok(event)
    }
}

fn typed<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, PayloadError> {
    serde_json::from_value(payload).map_err(|source| PayloadError::Shape {
        kind: kind.to_owned(),
        source,
    })
}

/// A [`SyncEvent`] stamped with the time it was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// The event.
    pub event: SyncEvent,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Stamp an event with the current time.
    pub fn now(event: SyncEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    /// Render the full wire payload: fields plus `type` and `timestamp`.
    ///
    /// Non-object payloads (possible for [`SyncEvent::Other`]) are nested
    /// under a `data` key.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let kind = self.event.kind();
        let body = self.event.payload_value()?;
        let mut map = match body {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert(String::from("data"), other);
                map
            }
        };
        let _ = map.insert(String::from("type"), Value::from(kind.as_str()));
        let _ = map.insert(
            String::from("timestamp"),
            Value::from(self.timestamp.to_rfc3339()),
        );
        Ok(Value::Object(map))
    }

    /// Render the wire payload as a compact JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        self.to_value().and_then(|value| serde_json::to_string(&value))
    }

    /// Decode a raw frame payload.
    ///
    /// `event_name` is the frame's kind line, if any. A missing or
    /// unparsable `timestamp` is replaced with the receive time.
    pub fn decode(event_name: Option<&str>, data: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(data).map_err(PayloadError::Json)?;
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));
        let event = SyncEvent::from_payload(event_name, value)?;
        Ok(Self { event, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_payload_carries_type_and_fields() {
        let envelope = EventEnvelope::now(SyncEvent::progress(50.0, "parsing playlist"));
        let value = envelope.to_value().ok().unwrap_or_default();
        assert_eq!(value.get("type").and_then(Value::as_str), Some("progress"));
        assert_eq!(value.get("percentage").and_then(Value::as_f64), Some(50.0));
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn decodes_known_kind_from_type_field() {
        let data = r#"{"type":"error","message":"source unreachable"}"#;
        let decoded = EventEnvelope::decode(Some("message"), data).ok();
        let event = decoded.map(|d| d.event);
        assert_eq!(
            event,
            Some(SyncEvent::Error(ImportFailure {
                message: String::from("source unreachable"),
            }))
        );
    }

    #[test]
    fn falls_back_to_frame_name_when_type_missing() {
        let data = r#"{"count":42}"#;
        let decoded = EventEnvelope::decode(Some("channels_available"), data).ok();
        assert!(matches!(
            decoded.map(|d| d.event),
            Some(SyncEvent::ChannelsAvailable(ChannelsAvailable { count: 42, .. }))
        ));
    }

    #[test]
    fn unknown_kind_is_dispatched_generically() {
        let data = r#"{"type":"thumbnails_ready","n":3}"#;
        let decoded = EventEnvelope::decode(None, data).ok();
        let kind = decoded.map(|d| d.event.kind());
        assert_eq!(kind, Some(EventKind::Other(String::from("thumbnails_ready"))));
    }

    #[test]
    fn malformed_json_is_a_payload_error() {
        let result = EventEnvelope::decode(Some("progress"), "{not json");
        assert!(matches!(result, Err(PayloadError::Json(_))));
    }

    #[test]
    fn wrong_shape_is_a_payload_error() {
        let result = EventEnvelope::decode(None, r#"{"type":"progress","percentage":"half"}"#);
        assert!(matches!(result, Err(PayloadError::Shape { .. })));
    }

    #[test]
    fn empty_other_kind_renders_as_message() {
        assert_eq!(EventKind::Other(String::new()).as_str(), DEFAULT_KIND);
    }

    #[test]
    fn timestamp_survives_encoding() {
        let envelope = EventEnvelope::now(SyncEvent::Complete(Complete { data: Value::Null }));
        let json = envelope.to_json().unwrap_or_default();
        let decoded = EventEnvelope::decode(None, &json).ok();
        assert_eq!(decoded.map(|d| d.timestamp), Some(envelope.timestamp));
    }
}
