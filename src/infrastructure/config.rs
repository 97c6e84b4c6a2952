//! Configuration management for the multiplexer
//!
//! Loads configuration from config.toml at startup.
//! All timing values are configurable to avoid hardcoded constants.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding `server.listen_addr`
pub const ENV_LISTEN_ADDR: &str = "CONNMUX_LISTEN_ADDR";

/// Environment variable overriding `server.shared_key`
pub const ENV_SHARED_KEY: &str = "CONNMUX_SHARED_KEY";

/// Multiplexer configuration
///
/// Loaded from config.toml at startup. Every section falls back to
/// defaults when missing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener, coordinator and accept loop settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Reference pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on (host:port, resolved at bind time)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Secret handed to every pool
    #[serde(default)]
    pub shared_key: String,

    /// Upper bound for reading the 8-byte client header
    #[serde(default = "default_header_timeout_ms")]
    pub header_timeout_ms: u64,

    /// Coordinator heartbeat period
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// First retry delay after a failed accept
    #[serde(default = "default_accept_backoff_initial_ms")]
    pub accept_backoff_initial_ms: u64,

    /// Cap for the accept retry delay
    #[serde(default = "default_accept_backoff_max_ms")]
    pub accept_backoff_max_ms: u64,

    /// Disable Nagle's algorithm on accepted sockets
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

/// Reference pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// A pool with no live session for this long signals stop
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// How often a pool checks for idleness
    #[serde(default = "default_idle_check_interval_ms")]
    pub idle_check_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Default filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also log to stdout
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            shared_key: String::new(),
            header_timeout_ms: default_header_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            accept_backoff_initial_ms: default_accept_backoff_initial_ms(),
            accept_backoff_max_ms: default_accept_backoff_max_ms(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            idle_check_interval_ms: default_idle_check_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
            console: default_console(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:7600".to_string()
}

fn default_header_timeout_ms() -> u64 {
    3_000
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_accept_backoff_initial_ms() -> u64 {
    5
}

fn default_accept_backoff_max_ms() -> u64 {
    1_000
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_idle_check_interval_ms() -> u64 {
    1_000
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_console() -> bool {
    true
}

impl ServerConfig {
    /// Config listening on `addr` with `shared_key`, defaults elsewhere
    pub fn new(addr: impl Into<String>, shared_key: impl Into<String>) -> Self {
        Self {
            listen_addr: addr.into(),
            shared_key: shared_key.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    #[inline]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[inline]
    pub fn accept_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_initial_ms)
    }

    #[inline]
    pub fn accept_backoff_max(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_max_ms)
    }
}

impl PoolConfig {
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }
}

impl Config {
    /// Load configuration from config.toml file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// Environment overrides are applied afterwards.
    /// # Errors
    /// Returns error if file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Config::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }
        if let Some(key) = lookup(ENV_SHARED_KEY) {
            self.server.shared_key = key;
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("server.listen_addr is empty".into()));
        }
        if server.header_timeout_ms == 0 {
            return Err(ConfigError::Invalid("server.header_timeout_ms must be > 0".into()));
        }
        if server.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("server.heartbeat_interval_ms must be > 0".into()));
        }
        if server.accept_backoff_initial_ms == 0
            || server.accept_backoff_initial_ms > server.accept_backoff_max_ms
        {
            return Err(ConfigError::Invalid(
                "server.accept_backoff_initial_ms must be > 0 and <= accept_backoff_max_ms".into(),
            ));
        }
        if self.pool.idle_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pool.idle_timeout_ms must be > 0".into()));
        }
        if self.pool.idle_check_interval_ms == 0 {
            return Err(ConfigError::Invalid("pool.idle_check_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Value out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:7600");
        assert_eq!(config.server.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(config.server.header_timeout(), Duration::from_secs(3));
        assert!(config.server.tcp_nodelay);
        assert_eq!(config.pool.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.directory, PathBuf::from("logs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            listen_addr = "127.0.0.1:9000"
            header_timeout_ms = 250

            [pool]
            idle_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.server.header_timeout(), Duration::from_millis(250));
        assert_eq!(config.server.heartbeat_interval_ms, 2_000);
        assert_eq!(config.pool.idle_timeout_ms, 5_000);
        assert_eq!(config.pool.idle_check_interval_ms, 1_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[server\nlisten_addr = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            ENV_LISTEN_ADDR => Some("127.0.0.1:1".to_string()),
            ENV_SHARED_KEY => Some("s3cret".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen_addr, "127.0.0.1:1");
        assert_eq!(config.server.shared_key, "s3cret");
    }

    #[test]
    fn test_validate_rejects_zero_heartbeat() {
        let mut config = Config::default();
        config.server.heartbeat_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_idle_timeout() {
        let mut config = Config::default();
        config.pool.idle_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.server.accept_backoff_initial_ms = 2_000;
        config.server.accept_backoff_max_ms = 1_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
