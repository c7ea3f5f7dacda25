//! # Configuration Management
//!
//! Structured configuration for the protocol server: listen address,
//! framing limits, and the timers driving the connection lifecycle.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Default keep-alive interval mirrored by compatible clients.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Default hello deadline for freshly accepted sockets.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default `send_and_wait` correlation timeout.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default maximum data-frame body size.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:9933")
    pub bind_address: String,

    /// Maximum data-frame body size in bytes
    pub max_frame_size: usize,

    /// Compression threshold advertised in the handshake acknowledgement
    pub compression_threshold: i32,

    /// Idle interval after which a system ping is sent
    #[serde(with = "duration_serde")]
    pub keep_alive_interval: Duration,

    /// Deadline for the hello frame on a freshly accepted socket
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Default timeout for request/response correlation
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:9933"),
            max_frame_size: MAX_FRAME_SIZE,
            compression_threshold: 2048,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SMARTFOX_PROTOCOL_BIND_ADDRESS") {
            config.bind_address = addr;
        }

        if let Ok(size) = std::env::var("SMARTFOX_PROTOCOL_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.max_frame_size = val;
            }
        }

        if let Ok(interval) = std::env::var("SMARTFOX_PROTOCOL_KEEP_ALIVE_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.keep_alive_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("SMARTFOX_PROTOCOL_RESPONSE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.response_timeout = Duration::from_millis(val);
            }
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

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address format: '{}' (expected format: '0.0.0.0:9933')",
                self.bind_address
            ));
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_size
            ));
        }

        if self.compression_threshold < 0 {
            errors.push("Compression threshold cannot be negative".to_string());
        }

        if self.keep_alive_interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        } else if self.keep_alive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }

    /// Validate and return Result - convenience method
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

/// Helper module for Duration serialization/deserialization (milliseconds)
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
