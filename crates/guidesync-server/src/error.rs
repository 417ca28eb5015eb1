//! Error types for the broker server binary.

/// Top-level error for the server binary.
///
/// Wraps every failure mode of startup so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServerBinError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: guidesync_broker::ServerError,
    },
}
