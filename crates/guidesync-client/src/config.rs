//! Configuration for the guidesync client.
//!
//! All configuration is loaded from environment variables. Only the
//! server URL is required; the remaining knobs default to the values the
//! browser client ships with.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;

/// Complete client configuration loaded from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker base URL (e.g. `http://localhost:8090`), without trailing slash.
    pub server_url: String,
    /// JSON file that persists the session token. `None` keeps it in memory.
    pub token_file: Option<PathBuf>,
    /// Fixed wait between event stream reconnect attempts.
    pub reconnect_delay: Duration,
    /// Items requested per chunk.
    pub chunk_size: usize,
    /// Upper bound on chunks fetched per load.
    pub max_chunks: usize,
    /// Pause between consecutive chunk requests.
    pub chunk_delay: Duration,
    /// Validation attempts allowed per token inside one cooldown window.
    pub validation_max_attempts: u32,
    /// Length of the validation cooldown window.
    pub validation_cooldown: Duration,
}

impl ClientConfig {
    /// Configuration with defaults for everything except the server URL.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_owned(),
            token_file: None,
            reconnect_delay: Duration::from_millis(5000),
            chunk_size: 500,
            max_chunks: 100,
            chunk_delay: Duration::from_millis(100),
            validation_max_attempts: 3,
            validation_cooldown: Duration::from_millis(10_000),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - `GUIDESYNC_SERVER_URL` -- broker base URL
    ///
    /// Optional variables:
    /// - `GUIDESYNC_TOKEN_FILE` -- JSON file for the persisted token
    /// - `RECONNECT_DELAY_MS` -- stream reconnect delay (default 5000)
    /// - `CHUNK_SIZE` -- items per chunk (default 500)
    /// - `MAX_CHUNKS` -- chunk cap per load (default 100)
    /// - `CHUNK_DELAY_MS` -- pause between chunks (default 100)
    /// - `VALIDATION_MAX_ATTEMPTS` -- validations per window (default 3)
    /// - `VALIDATION_COOLDOWN_MS` -- validation window (default 10000)
    pub fn from_env() -> Result<Self, ClientError> {
        let server_url = std::env::var("GUIDESYNC_SERVER_URL").map_err(|e| {
            ClientError::Config(format!("missing required env var GUIDESYNC_SERVER_URL: {e}"))
        })?;
        let defaults = Self::new(server_url);

        let token_file = std::env::var_os("GUIDESYNC_TOKEN_FILE")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let chunk_size: usize = parse_env("CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            return Err(ClientError::Config(String::from("CHUNK_SIZE must be positive")));
        }
        let max_chunks: usize = parse_env("MAX_CHUNKS", defaults.max_chunks)?;
        if max_chunks == 0 {
            return Err(ClientError::Config(String::from("MAX_CHUNKS must be positive")));
        }

        Ok(Self {
            token_file,
            reconnect_delay: parse_millis("RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
            chunk_size,
            max_chunks,
            chunk_delay: parse_millis("CHUNK_DELAY_MS", defaults.chunk_delay)?,
            validation_max_attempts: parse_env(
                "VALIDATION_MAX_ATTEMPTS",
                defaults.validation_max_attempts,
            )?,
            validation_cooldown: parse_millis(
                "VALIDATION_COOLDOWN_MS",
                defaults.validation_cooldown,
            )?,
            ..defaults
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_env<T>(name: &str, default: T) -> Result<T, ClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_millis(name: &str, default: Duration) -> Result<Duration, ClientError> {
    parse_env(name, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_browser_client() {
        let config = ClientConfig::new("http://localhost:8090/");
        assert_eq!(config.server_url, "http://localhost:8090");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.max_chunks, 100);
        assert_eq!(config.validation_max_attempts, 3);
        assert_eq!(config.validation_cooldown, Duration::from_secs(10));
        assert!(config.token_file.is_none());
    }
}
