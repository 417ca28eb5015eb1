//! Paginated chunk responses and session endpoint bodies.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::groups::RawGroup;

/// Pagination metadata of a chunk response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Pagination {
    /// Total number of items across all pages.
    #[serde(alias = "total", alias = "totalItems")]
    pub total_items: usize,
    /// One-based page number of this response.
    #[serde(default)]
    pub page: usize,
    /// Page size used for this response.
    #[serde(default)]
    pub limit: usize,
    /// Number of pages at this page size.
    #[serde(default)]
    pub total_pages: usize,
}

impl Pagination {
    /// Build pagination metadata for `page` of a collection.
    pub const fn new(total_items: usize, page: usize, limit: usize) -> Self {
        Self {
            total_items,
            page,
            limit,
            total_pages: page_count(total_items, limit),
        }
    }
}

/// Number of pages of `limit` items needed to cover `total` items.
///
/// A zero `limit` yields zero pages.
pub const fn page_count(total: usize, limit: usize) -> usize {
    match total.checked_div(limit) {
        Some(full) if total % limit == 0 => full,
        Some(full) => full.saturating_add(1),
        None => 0,
    }
}

/// One page of items, optionally carrying a group aggregate.
///
/// `G` defaults to [`RawGroup`] so clients accept any aggregate shape;
/// the broker serializes canonical [`GroupCount`](crate::GroupCount)s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse<T, G = RawGroup> {
    /// Items on this page.
    #[serde(alias = "channels")]
    pub items: Vec<T>,
    /// Group aggregate over the whole collection, when supplied.
    #[serde(alias = "aggregate", skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<G>>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

/// Response body of the create-session endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CreateSessionResponse {
    /// The newly issued session token.
    #[serde(alias = "sessionId", alias = "token")]
    pub session_id: String,
}

/// Response body of the validate-session endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ValidateSessionResponse {
    /// Whether the server recognizes the token.
    pub valid: bool,
}
