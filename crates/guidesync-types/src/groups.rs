//! Grouped-count aggregates attached to channel pages.
//!
//! Data sources report group aggregates in several shapes: a bare label,
//! or an object whose name and count live under one of several field
//! names. [`normalize_groups`] folds all of them into [`GroupCount`]
//! records, and [`count_groups`] derives the same aggregate from raw
//! group keys when a source omits it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Group name used for items that carry no group.
pub const UNGROUPED: &str = "Uncategorized";

/// Field names recognized as a group's name, in priority order.
const NAME_FIELDS: [&str; 5] = ["name", "group", "group_title", "title", "label"];

/// Field names recognized as a group's count, in priority order.
const COUNT_FIELDS: [&str; 4] = ["count", "channel_count", "channels", "total"];

/// Canonical `{name, count}` group aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GroupCount {
    /// Group name.
    pub name: String,
    /// Number of items in the group.
    pub count: usize,
}

/// A group aggregate entry as reported by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGroup {
    /// A bare group label without a count.
    Label(String),
    /// An object with a name and (optionally) a count field.
    Record(Map<String, Value>),
}

impl RawGroup {
    /// Normalize into a [`GroupCount`].
    ///
    /// Returns `None` when no non-empty name can be found. Labels and
    /// records without a recognizable count get a count of zero.
    pub fn normalize(&self) -> Option<GroupCount> {
        match self {
            Self::Label(label) => {
                let name = label.trim();
                (!name.is_empty()).then(|| GroupCount {
                    name: name.to_owned(),
                    count: 0,
                })
            }
            Self::Record(map) => {
                let name = NAME_FIELDS
                    .iter()
                    .filter_map(|field| map.get(*field).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|name| !name.is_empty())?;
                let count = COUNT_FIELDS
                    .iter()
                    .find_map(|field| map.get(*field).and_then(count_value))
                    .unwrap_or(0);
                Some(GroupCount {
                    name: name.to_owned(),
                    count,
                })
            }
        }
    }
}

impl From<GroupCount> for RawGroup {
    fn from(group: GroupCount) -> Self {
        let mut map = Map::new();
        let _ = map.insert(String::from("name"), Value::from(group.name));
        let _ = map.insert(String::from("count"), Value::from(group.count));
        Self::Record(map)
    }
}

/// Read a count from a JSON number or numeric string.
fn count_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize heterogeneous group entries, deduplicating by
/// case-insensitive name. The first occurrence of a name wins.
pub fn normalize_groups(raw: &[RawGroup]) -> Vec<GroupCount> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .filter_map(RawGroup::normalize)
        .filter(|group| seen.insert(group.name.to_lowercase()))
        .collect()
}

/// Derive group counts from a sequence of group keys.
///
/// Missing or blank keys count towards [`UNGROUPED`]. Names that differ
/// only in case are merged under the first spelling seen. The result is
/// ordered by case-insensitive name, so repeated derivation over the same
/// items yields the same aggregate.
pub fn count_groups<'a, I>(keys: I) -> Vec<GroupCount>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut counts: BTreeMap<String, GroupCount> = BTreeMap::new();
    for key in keys {
        let name = key.map(str::trim).filter(|k| !k.is_empty()).unwrap_or(UNGROUPED);
        let entry = counts
            .entry(name.to_lowercase())
            .or_insert_with(|| GroupCount {
                name: name.to_owned(),
                count: 0,
            });
        entry.count = entry.count.saturating_add(1);
    }
    counts.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> Vec<RawGroup> {
        serde_json::from_str(json).unwrap_or_default()
    }

    #[test]
    fn normalizes_mixed_shapes() {
        let groups = normalize_groups(&raw(
            r#"["Sports", {"group_title":"News","channel_count":4}, {"name":"Kids","count":"7"}]"#,
        ));
        assert_eq!(
            groups,
            vec![
                GroupCount { name: String::from("Sports"), count: 0 },
                GroupCount { name: String::from("News"), count: 4 },
                GroupCount { name: String::from("Kids"), count: 7 },
            ]
        );
    }

    #[test]
    fn dedups_case_insensitively() {
        let groups = normalize_groups(&raw(
            r#"[{"name":"News","count":4}, {"name":"NEWS","count":9}, "news"]"#,
        ));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.first().map(|g| g.count), Some(4));
    }

    #[test]
    fn skips_nameless_entries() {
        let groups = normalize_groups(&raw(r#"["", {"count":3}]"#));
        assert!(groups.is_empty());
    }

    #[test]
    fn derived_counts_sum_to_item_count() {
        let keys = [
            Some("A"), Some("B"), Some("A"), None, Some("a"), Some("B"), Some(" "),
        ];
        let groups = count_groups(keys);
        let total: usize = groups.iter().map(|g| g.count).sum();
        assert_eq!(total, keys.len());
        assert_eq!(
            groups,
            vec![
                GroupCount { name: String::from("A"), count: 3 },
                GroupCount { name: String::from("B"), count: 2 },
                GroupCount { name: String::from(UNGROUPED), count: 2 },
            ]
        );
        assert_eq!(count_groups(keys), groups);
    }
}
