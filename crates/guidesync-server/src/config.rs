//! Configuration loading for the broker server.
//!
//! The server reads `guidesync-config.yaml` from the working directory, or
//! the path named by `GUIDESYNC_CONFIG`. Every section and field has a
//! default, so an empty or missing file yields a runnable server.
//!
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 8090
//! broker:
//!   subscriber_buffer: 256
//!   progress_min_interval_ms: 500
//! logging:
//!   level: "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use guidesync_broker::state::{DEFAULT_PROGRESS_INTERVAL, DEFAULT_SUBSCRIBER_BUFFER};
use guidesync_broker::{BrokerSettings, ServerConfig};
use serde::Deserialize;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "guidesync-config.yaml";

/// Environment variable that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "GUIDESYNC_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
///
/// Mirrors the structure of `guidesync-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// Listener settings.
    #[serde(default)]
    pub server: ListenConfig,

    /// Event broker tunables.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerSettings {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Load from `path` if it exists, falling back to defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Network settings for the HTTP listener.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
        }
    }

    /// Broker tunables in the form the broker crate expects.
    pub const fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            subscriber_buffer: self.broker.subscriber_buffer,
            progress_min_interval: Duration::from_millis(self.broker.progress_min_interval_ms),
        }
    }
}

/// Resolve the config file path from `GUIDESYNC_CONFIG` or the default.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Event broker tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// Frames queued per subscriber before new frames are dropped for it.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Minimum spacing between intermediate progress broadcasts.
    #[serde(default = "default_progress_min_interval_ms")]
    pub progress_min_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            progress_min_interval_ms: default_progress_min_interval_ms(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    ServerConfig::default().host
}

fn default_port() -> u16 {
    ServerConfig::default().port
}

const fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

#[allow(clippy::cast_possible_truncation)]
const fn default_progress_min_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_broker_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.server_config(), ServerConfig::default());
        assert_eq!(settings.broker_settings(), BrokerSettings::default());
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
broker:
  subscriber_buffer: 32
  progress_min_interval_ms: 5000
logging:
  level: "debug"
"#;
        let settings = ServerSettings::parse(yaml).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.broker_settings().subscriber_buffer, 32);
        assert_eq!(
            settings.broker_settings().progress_min_interval,
            Duration::from_secs(5)
        );
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let settings = ServerSettings::parse("server:\n  port: 9100\n").unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.broker, BrokerConfig::default());
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(ServerSettings::parse("").unwrap(), ServerSettings::default());
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        let result = ServerSettings::parse("server: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ServerSettings::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, ServerSettings::default());
    }

    #[test]
    fn file_is_read_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guidesync-config.yaml");
        std::fs::write(&path, "logging:\n  level: warn\n").unwrap();
        let settings = ServerSettings::load_or_default(&path).unwrap();
        assert_eq!(settings.logging.level, "warn");
    }
}
