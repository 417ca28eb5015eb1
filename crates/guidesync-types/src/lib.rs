//! Shared wire types for guidesync.
//!
//! This crate is the single source of truth for everything that crosses
//! the wire between the broker and its clients. Payload types flow to
//! `TypeScript` via `ts-rs` for browser consumers.
//!
//! # Modules
//!
//! - [`token`] -- Validated opaque session tokens
//! - [`event`] -- Import events and their JSON envelope
//! - [`channel`] -- Playlist channel records
//! - [`groups`] -- Group aggregates and their normalization
//! - [`page`] -- Paginated chunk responses and session endpoint bodies

pub mod channel;
pub mod event;
pub mod groups;
pub mod page;
pub mod token;

// Re-export all public types at crate root for convenience.
pub use channel::Channel;
pub use event::{
    ChannelsAvailable, Complete, ConnectionAck, DEFAULT_KIND, EventEnvelope, EventKind,
    GuideSourceAvailable, ImportFailure, PayloadError, Progress, SyncEvent,
};
pub use groups::{GroupCount, RawGroup, UNGROUPED, count_groups, normalize_groups};
pub use page::{
    ChunkResponse, CreateSessionResponse, Pagination, ValidateSessionResponse, page_count,
};
pub use token::{LOCAL_TOKEN_PREFIX, PLACEHOLDER_TOKENS, SessionToken, TokenError};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the files into `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::event::ConnectionAck::export_all();
        let _ = crate::event::Progress::export_all();
        let _ = crate::event::ChannelsAvailable::export_all();
        let _ = crate::event::GuideSourceAvailable::export_all();
        let _ = crate::event::Complete::export_all();
        let _ = crate::event::ImportFailure::export_all();
        let _ = crate::channel::Channel::export_all();
        let _ = crate::groups::GroupCount::export_all();
        let _ = crate::page::Pagination::export_all();
        let _ = crate::page::CreateSessionResponse::export_all();
        let _ = crate::page::ValidateSessionResponse::export_all();
    }
}
