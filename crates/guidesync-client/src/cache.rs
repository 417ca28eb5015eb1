//! Per-session cache of loaded items and their group aggregate.
//!
//! Items are keyed by id; merging a chunk that repeats cached ids
//! replaces those items in place and never grows the cache. The group
//! aggregate is either the one the server supplied (normalized) or, until
//! one is supplied, derived from the cached items after every merge.

use std::collections::HashMap;

use dashmap::DashMap;
use guidesync_types::{Channel, GroupCount, RawGroup, SessionToken, count_groups, normalize_groups};

/// An item the cache can hold.
pub trait CacheItem: Clone + Send + Sync + 'static {
    /// Unique id within a session.
    fn id(&self) -> &str;

    /// Group key used to derive the aggregate.
    fn group(&self) -> Option<&str>;
}

impl CacheItem for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }
}

/// Copy of one session's cached state.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<T> {
    /// Items in first-seen order.
    pub items: Vec<T>,
    /// Group aggregate over the whole collection.
    pub groups: Vec<GroupCount>,
    /// Total reported by the server, once known.
    pub total: Option<usize>,
}

impl<T> CacheSnapshot<T> {
    /// Whether every item the server reported is cached.
    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.items.len() >= total)
    }
}

#[derive(Debug)]
struct CachedSession<T> {
    items: Vec<T>,
    positions: HashMap<String, usize>,
    groups: Vec<GroupCount>,
    groups_supplied: bool,
    total: Option<usize>,
}

impl<T> Default for CachedSession<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
            groups: Vec::new(),
            groups_supplied: false,
            total: None,
        }
    }
}

/// Items cached per session token.
#[derive(Debug)]
pub struct SessionCache<T> {
    sessions: DashMap<SessionToken, CachedSession<T>>,
}

impl<T> Default for SessionCache<T> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<T: CacheItem> SessionCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a chunk into `token`'s cache and return the cached count.
    ///
    /// `groups` replaces the aggregate when present. Without it the
    /// aggregate is re-derived from all cached items, unless the server
    /// supplied one earlier in this session. `total` updates the known
    /// total when present.
    pub fn merge(
        &self,
        token: &SessionToken,
        items: Vec<T>,
        groups: Option<&[RawGroup]>,
        total: Option<usize>,
    ) -> usize {
        let mut session = self.sessions.entry(token.clone()).or_default();
        for item in items {
            match session.positions.get(item.id()).copied() {
                Some(index) => {
                    if let Some(slot) = session.items.get_mut(index) {
                        *slot = item;
                    }
                }
                None => {
                    let index = session.items.len();
                    let _ = session.positions.insert(item.id().to_owned(), index);
                    session.items.push(item);
                }
            }
        }

        if let Some(raw) = groups {
            session.groups = normalize_groups(raw);
            session.groups_supplied = true;
        } else if !session.groups_supplied {
            session.groups = count_groups(session.items.iter().map(CacheItem::group));
        }

        if total.is_some() {
            session.total = total;
        }
        session.items.len()
    }

    /// Copy of `token`'s cached state.
    pub fn snapshot(&self, token: &SessionToken) -> Option<CacheSnapshot<T>> {
        self.sessions.get(token).map(|session| CacheSnapshot {
            items: session.items.clone(),
            groups: session.groups.clone(),
            total: session.total,
        })
    }

    /// Whether `token`'s cache holds every item the server reported.
    pub fn is_complete(&self, token: &SessionToken) -> bool {
        self.sessions
            .get(token)
            .is_some_and(|s| s.total.is_some_and(|total| s.items.len() >= total))
    }

    /// Number of items cached for `token`.
    pub fn len(&self, token: &SessionToken) -> usize {
        self.sessions.get(token).map_or(0, |s| s.items.len())
    }

    /// Whether nothing is cached for `token`.
    pub fn is_empty(&self, token: &SessionToken) -> bool {
        self.len(token) == 0
    }

    /// Drop `token`'s cache.
    pub fn clear(&self, token: &SessionToken) {
        let _ = self.sessions.remove(token);
    }

    /// Drop every session's cache.
    pub fn clear_all(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token() -> SessionToken {
        SessionToken::parse("abc").unwrap()
    }

    fn channel(id: &str, group: &str) -> Channel {
        Channel::new(id, id).in_group(group)
    }

    #[test]
    fn merging_known_ids_keeps_count() {
        let cache = SessionCache::new();
        let t = token();
        assert_eq!(
            cache.merge(&t, vec![channel("a", "News"), channel("b", "News")], None, Some(3)),
            2
        );
        let renamed = Channel::new("a", "Renamed").in_group("News");
        assert_eq!(cache.merge(&t, vec![renamed, channel("b", "News")], None, None), 2);

        let snapshot = cache.snapshot(&t).unwrap();
        assert_eq!(snapshot.items.first().unwrap().name, "Renamed");
        assert_eq!(snapshot.total, Some(3));
        assert!(!snapshot.is_complete());
    }

    #[test]
    fn derived_groups_sum_to_item_count() {
        let cache = SessionCache::new();
        let t = token();
        let items = vec![
            channel("a", "News"),
            channel("b", "news"),
            channel("c", "Sports"),
            Channel::new("d", "d"),
        ];
        let _ = cache.merge(&t, items, None, Some(4));

        let first = cache.snapshot(&t).unwrap();
        let sum: usize = first.groups.iter().map(|g| g.count).sum();
        assert_eq!(sum, 4);
        assert_eq!(first.groups.len(), 3);
        assert!(first.is_complete());

        // Re-merging the same items derives the same aggregate.
        let _ = cache.merge(&t, first.items.clone(), None, None);
        assert_eq!(cache.snapshot(&t).unwrap().groups, first.groups);
    }

    #[test]
    fn supplied_groups_are_normalized_and_kept() {
        let cache = SessionCache::new();
        let t = token();
        let supplied: Vec<RawGroup> = serde_json::from_value(serde_json::json!([
            {"group_title": "News", "channel_count": "10"},
            "Movies",
            {"name": "NEWS", "count": 3}
        ]))
        .unwrap();
        let _ = cache.merge(&t, vec![channel("a", "News")], Some(&supplied), Some(20));
        let _ = cache.merge(&t, vec![channel("b", "Kids")], None, None);

        let groups = cache.snapshot(&t).unwrap().groups;
        assert_eq!(
            groups,
            vec![
                GroupCount {
                    name: String::from("News"),
                    count: 10
                },
                GroupCount {
                    name: String::from("Movies"),
                    count: 0
                },
            ]
        );
    }

    #[test]
    fn clear_forgets_session() {
        let cache = SessionCache::new();
        let t = token();
        let _ = cache.merge(&t, vec![channel("a", "News")], None, Some(1));
        assert!(cache.is_complete(&t));
        cache.clear(&t);
        assert!(cache.is_empty(&t));
        assert!(cache.snapshot(&t).is_none());
    }
}
