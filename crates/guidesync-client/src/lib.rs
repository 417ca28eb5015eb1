//! Client side of guidesync.
//!
//! Follows an import running on the broker and mirrors its results
//! locally:
//!
//! - **[`SessionIdentity`]** -- resolves, validates and clears the session
//!   token, with a local fallback when the server is unreachable
//! - **[`StreamClient`]** -- the session's event stream with typed
//!   listeners and fixed-delay reconnect
//! - **[`ProgressiveLoader`]** -- chunked, cancellable channel loading
//!   into a [`SessionCache`]
//! - **[`SyncSession`]** -- all of the above wired together
//!
//! # Architecture
//!
//! ```text
//! SessionIdentity --token--> StreamClient --channels_available/complete-->
//!     ProgressiveLoader --chunks--> SessionCache
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod loader;
pub mod session;
pub mod store;
pub mod stream;

pub use api::{ChunkSource, HttpApi, SessionApi};
pub use cache::{CacheItem, CacheSnapshot, SessionCache};
pub use config::ClientConfig;
pub use error::ClientError;
pub use identity::{IdentityEvent, SessionIdentity, TOKEN_KEYS, TokenState, ValidationPolicy};
pub use loader::{LoadHandle, LoadOutcome, LoadState, ProgressFn, ProgressiveLoader};
pub use session::{LoadProgress, SyncSession};
pub use store::{JsonFileTokenStore, MemoryTokenStore, TokenStore};
pub use stream::{ConnectionState, Listener, ListenerHandle, ListenerKind, StreamClient};
