//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ACRPC_SERVER_CONFIG or --config)
//! 3. Environment variables

use acrpc_protocol::{DEFAULT_PORT, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Request size limits.
    pub limits: LimitsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ACRPC_SERVER_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        let var = |key: &str| std::env::var(key).ok();
        self.network.apply_overrides(var);
        self.limits.apply_overrides(var);
    }

    /// Checks limits and timeouts for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.io_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "network.io_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "limits.max_payload_size exceeds protocol maximum of {} bytes",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.limits.max_content_size > u32::MAX as u64 {
            return Err(ConfigError::ValidationError(
                "limits.max_content_size does not fit the content length field".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Time allowed for a whole exchange on one connection, in seconds.
    pub io_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            io_timeout_secs: 30,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("ACRPC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(timeout) = var("ACRPC_IO_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.io_timeout_secs = secs;
            }
        }

        if let Some(max) = var("ACRPC_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns the I/O timeout as Duration.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Request size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request payload accepted.
    pub max_payload_size: u32,
    /// Largest request content accepted.
    pub max_content_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_content_size: 256 * 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(size) = var("ACRPC_MAX_PAYLOAD") {
            if let Ok(n) = size.parse() {
                self.max_payload_size = n;
            }
        }

        if let Some(size) = var("ACRPC_MAX_CONTENT") {
            if let Ok(n) = size.parse() {
                self.max_content_size = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Serializes SocketAddr as a string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
