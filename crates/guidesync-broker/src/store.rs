//! Per-session channel store backing the paginated channel endpoint.
//!
//! The import pipeline appends parsed channels as it goes; clients page
//! through them with [`ChannelStore::page`]. Re-appending a known channel
//! id replaces the stored record in place, so order is stable across
//! re-imports of the same playlist.

use std::collections::HashMap;

use dashmap::DashMap;
use guidesync_types::{Channel, ChunkResponse, GroupCount, Pagination, SessionToken, count_groups};
use tracing::debug;

/// Largest page size the store will serve.
pub const MAX_PAGE_LIMIT: usize = 5000;

/// Page size used when the request does not specify one.
pub const DEFAULT_PAGE_LIMIT: usize = 500;

#[derive(Debug, Default)]
struct SessionChannels {
    channels: Vec<Channel>,
    positions: HashMap<String, usize>,
}

/// Channels parsed for each session.
#[derive(Debug, Default)]
pub struct ChannelStore {
    sessions: DashMap<SessionToken, SessionChannels>,
}

impl ChannelStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or replace channels for a session.
    ///
    /// Returns the session's total channel count afterwards.
    pub fn append(&self, token: &SessionToken, channels: Vec<Channel>) -> usize {
        let mut entry = self.sessions.entry(token.clone()).or_default();
        let session = &mut *entry;
        let mut replaced: usize = 0;
        for channel in channels {
            if let Some(slot) = session
                .positions
                .get(&channel.id)
                .and_then(|&pos| session.channels.get_mut(pos))
            {
                *slot = channel;
                replaced = replaced.saturating_add(1);
            } else {
                let _ = session
                    .positions
                    .insert(channel.id.clone(), session.channels.len());
                session.channels.push(channel);
            }
        }
        let total = session.channels.len();
        debug!(session = %token, total, replaced, "Channels appended");
        total
    }

    /// Serve one page of a session's channels.
    ///
    /// `page` is one-based and clamped to at least 1; `limit` is clamped to
    /// `1..=MAX_PAGE_LIMIT`. Group counts are attached to the first page
    /// only. Unknown sessions yield an empty page.
    pub fn page(
        &self,
        token: &SessionToken,
        page: usize,
        limit: usize,
    ) -> ChunkResponse<Channel, GroupCount> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = page.saturating_sub(1).saturating_mul(limit);

        let Some(session) = self.sessions.get(token) else {
            return ChunkResponse {
                items: Vec::new(),
                groups: (page == 1).then(Vec::new),
                pagination: Pagination::new(0, page, limit),
            };
        };

        let items: Vec<Channel> = session
            .channels
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        let groups = (page == 1)
            .then(|| count_groups(session.channels.iter().map(|c| c.group.as_deref())));

        ChunkResponse {
            items,
            groups,
            pagination: Pagination::new(session.channels.len(), page, limit),
        }
    }

    /// Number of channels stored for a session.
    pub fn len(&self, token: &SessionToken) -> usize {
        self.sessions.get(token).map_or(0, |s| s.channels.len())
    }

    /// Drop a session's channels.
    pub fn clear(&self, token: &SessionToken) {
        let _ = self.sessions.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SessionToken {
        SessionToken::local_fallback()
    }

    fn channels(range: std::ops::Range<usize>) -> Vec<Channel> {
        range
            .map(|i| Channel::new(format!("c{i}"), format!("Channel {i}")).in_group(if i % 2 == 0 { "Even" } else { "Odd" }))
            .collect()
    }

    #[test]
    fn pages_cover_collection() {
        let store = ChannelStore::new();
        let t = token();
        assert_eq!(store.append(&t, channels(0..1200)), 1200);

        let first = store.page(&t, 1, 500);
        assert_eq!(first.items.len(), 500);
        assert_eq!(first.pagination.total_items, 1200);
        assert_eq!(first.pagination.total_pages, 3);
        assert!(first.groups.is_some());

        let last = store.page(&t, 3, 500);
        assert_eq!(last.items.len(), 200);
        assert_eq!(last.items.first().map(|c| c.id.as_str()), Some("c1000"));
        assert!(last.groups.is_none());
    }

    #[test]
    fn reappending_ids_replaces_in_place() {
        let store = ChannelStore::new();
        let t = token();
        let _ = store.append(&t, channels(0..3));
        let renamed = vec![Channel::new("c1", "Renamed")];
        assert_eq!(store.append(&t, renamed), 3);
        let page = store.page(&t, 1, 10);
        assert_eq!(page.items.get(1).map(|c| c.name.as_str()), Some("Renamed"));
    }

    #[test]
    fn first_page_groups_sum_to_total() {
        let store = ChannelStore::new();
        let t = token();
        let _ = store.append(&t, channels(0..7));
        let groups = store.page(&t, 1, 2).groups.unwrap_or_default();
        let sum: usize = groups.iter().map(|g| g.count).sum();
        assert_eq!(sum, 7);
    }

    #[test]
    fn unknown_session_is_empty() {
        let store = ChannelStore::new();
        let page = store.page(&token(), 0, 0);
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.limit, 1);
    }
}
