//! # Configuration Management
//!
//! Centralized configuration for the peer protocol.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()` (prefix `PEER_PROTOCOL_`)
//! - Direct instantiation with defaults and `default_with_overrides()`
//!
//! ## Sections
//! - **transport**: listen address, peer limits, queue sizes, timeouts
//! - **verifier**: DID verification cache and policy
//! - **logging**: subscriber level, format and outputs

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol version exchanged in the handshake
pub const PROTOCOL_VERSION: &str = "peer-protocol/1";

/// Delivery channel capacity shared by all peers of a transport
pub const DELIVERY_CAPACITY: usize = 1024;

/// Outbound queue capacity per peer
pub const PEER_QUEUE_CAPACITY: usize = 256;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file. Missing sections and fields
    /// take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables over the defaults.
    /// Unparseable values are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_var("LISTEN_ADDRESS") {
            config.transport.listen_address = addr;
        }
        if let Some(val) = env_parse::<usize>("MAX_INBOUND")? {
            config.transport.max_inbound = val;
        }
        if let Some(val) = env_parse::<usize>("MAX_OUTBOUND")? {
            config.transport.max_outbound = val;
        }
        if let Some(val) = env_parse::<u64>("HANDSHAKE_TIMEOUT_MS")? {
            config.transport.handshake_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("DIAL_TIMEOUT_MS")? {
            config.transport.dial_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("HEARTBEAT_INTERVAL_MS")? {
            config.transport.heartbeat_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<bool>("VERIFIER_CACHE")? {
            config.verifier.enable_cache = val;
        }
        if let Some(val) = env_parse::<u64>("VERIFIER_CACHE_TTL_MS")? {
            config.verifier.cache_ttl = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<bool>("REQUIRE_TRUSTED_ROOT")? {
            config.verifier.require_trusted_root = val;
        }
        if let Some(roots) = env_var("TRUSTED_ROOTS") {
            config.verifier.trusted_roots = roots
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        if let Some(val) = env_parse::<bool>("LOG_JSON")? {
            config.logging.json_format = val;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Every problem found across all sections; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.verifier.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Like [`validate`](Self::validate), folded into one `ConfigError`.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("PEER_PROTOCOL_{name}")).ok()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid value for PEER_PROTOCOL_{name}: '{raw}'"))
        }),
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Listen address (e.g., "127.0.0.1:7000"); port 0 picks a free port
    pub listen_address: String,

    /// Maximum number of admitted inbound peers
    pub max_inbound: usize,

    /// Maximum number of admitted outbound peers
    pub max_outbound: usize,

    /// Capacity of the shared delivery channel
    pub delivery_capacity: usize,

    /// Capacity of each peer's outbound queue
    pub peer_queue_capacity: usize,

    /// Bound on a complete handshake exchange
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Bound on establishing an outbound TCP connection
    #[serde(with = "duration_serde")]
    pub dial_timeout: Duration,

    /// Interval between heartbeat packets; zero disables heartbeats
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// How long shutdown waits for peer tasks
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Largest raw stream a peer may announce
    pub max_stream_bytes: u64,

    /// Largest encoded handshake message
    pub max_handshake_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("127.0.0.1:7000"),
            max_inbound: 64,
            max_outbound: 16,
            delivery_capacity: DELIVERY_CAPACITY,
            peer_queue_capacity: PEER_QUEUE_CAPACITY,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            dial_timeout: timeout::DEFAULT_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_stream_bytes: 64 * 1024 * 1024,
            max_handshake_bytes: crate::protocol::handshake::DEFAULT_MAX_HANDSHAKE_BYTES,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:7000')",
                self.listen_address
            ));
        }

        if self.max_inbound == 0 && self.max_outbound == 0 {
            errors.push("At least one of max_inbound or max_outbound must be non-zero".to_string());
        }

        if self.delivery_capacity == 0 {
            errors.push("Delivery capacity must be greater than 0".to_string());
        }
        if self.peer_queue_capacity == 0 {
            errors.push("Peer queue capacity must be greater than 0".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.dial_timeout.as_millis() < 100 {
            errors.push("Dial timeout too short (minimum: 100ms)".to_string());
        }

        if !self.heartbeat_interval.is_zero() && self.heartbeat_interval.as_millis() < 100 {
            errors.push(
                "Heartbeat interval too short (minimum: 100ms, or 0 to disable)".to_string(),
            );
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_stream_bytes == 0 {
            errors.push("Max stream bytes must be greater than 0".to_string());
        }

        if self.max_handshake_bytes < 1024 {
            errors.push("Max handshake bytes too small (minimum: 1 KB)".to_string());
        }

        errors
    }
}

/// DID verifier configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifierConfig {
    /// Cache signature verdicts
    pub enable_cache: bool,

    /// How long a cached verdict stays valid
    #[serde(with = "duration_serde")]
    pub cache_ttl: Duration,

    /// Maximum cached verdicts
    pub max_cache_size: usize,

    /// Require and check the document `created` timestamp
    pub validate_timestamp: bool,

    /// Allowed clock skew for `created`, past and future
    #[serde(with = "duration_serde")]
    pub timestamp_tolerance: Duration,

    /// Only accept documents rooted in `trusted_roots`
    pub require_trusted_root: bool,

    /// Initial trusted root DIDs
    #[serde(default)]
    pub trusted_roots: Vec<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl: Duration::from_secs(300),
            max_cache_size: 1024,
            validate_timestamp: true,
            timestamp_tolerance: Duration::from_secs(120),
            require_trusted_root: false,
            trusted_roots: Vec::new(),
        }
    }
}

impl VerifierConfig {
    /// Validate verifier configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enable_cache {
            if self.max_cache_size == 0 {
                errors.push("Verifier cache size must be greater than 0".to_string());
            }
            if self.cache_ttl.is_zero() {
                errors.push("Verifier cache TTL must be greater than 0".to_string());
            }
        }

        if self.validate_timestamp && self.timestamp_tolerance.is_zero() {
            errors.push("Timestamp tolerance must be greater than 0".to_string());
        }

        if self.require_trusted_root && self.trusted_roots.is_empty() {
            errors.push(
                "WARNING: require_trusted_root is set but no trusted roots are configured"
                    .to_string(),
            );
        }

        for root in &self.trusted_roots {
            if !root.starts_with("did:") {
                errors.push(format!("Trusted root is not a DID: '{root}'"));
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peer-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NetworkConfig::default().validate().is_empty());
        assert_eq!(NetworkConfig::default().transport.delivery_capacity, 1024);
        assert_eq!(NetworkConfig::default().transport.peer_queue_capacity, 256);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = NetworkConfig::from_toml(
            r#"
            [verifier]
            enable_cache = false
            cache_ttl = 1000
            max_cache_size = 8
            validate_timestamp = true
            timestamp_tolerance = 5000
            require_trusted_root = false
            "#,
        )
        .unwrap();
        assert!(!config.verifier.enable_cache);
        assert_eq!(config.verifier.timestamp_tolerance, Duration::from_secs(5));
        assert_eq!(config.transport.max_inbound, 64);
    }

    #[test]
    fn test_example_config_round_trips() {
        let text = NetworkConfig::example_config();
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.transport.listen_address, "127.0.0.1:7000");
        assert_eq!(parsed.logging.log_level, Level::INFO);
    }
}
