//! Playlist channel records served by the paginated channel endpoint.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// One channel parsed from an imported playlist.
///
/// Field aliases accept the attribute names used by common playlist
/// formats (`group-title`, `tvg-id`, `tvg-logo`) so pipeline output can
/// be posted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Channel {
    /// Unique channel identifier within a session.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Playlist group the channel belongs to.
    #[serde(default, alias = "group_title", alias = "group-title")]
    pub group: Option<String>,
    /// Logo image URL.
    #[serde(default, alias = "tvg_logo", alias = "tvg-logo")]
    pub logo: Option<String>,
    /// Stream URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Program-guide identifier the channel is matched to.
    #[serde(default, alias = "tvg_id", alias = "tvg-id")]
    pub guide_id: Option<String>,
}

impl Channel {
    /// Build a channel with only the required fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group: None,
            logo: None,
            url: None,
            guide_id: None,
        }
    }

    /// Set the playlist group.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}
