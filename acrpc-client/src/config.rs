//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ACRPC_CONFIG)
//! 3. Environment variables

use acrpc_protocol::{DEFAULT_PORT, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default maximum reply content buffered by `call` and `put` (256 MiB).
pub const DEFAULT_MAX_CONTENT_SIZE: u64 = 256 * 1024 * 1024;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Peer address (`host:port`).
    pub addr: String,
    /// Deadline for a whole call, in milliseconds.
    pub timeout_ms: u64,
    /// Largest reply payload accepted.
    pub max_payload_size: u32,
    /// Largest reply content buffered in memory.
    pub max_content_size: u64,
    /// First message id handed out.
    pub msg_id: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            timeout_ms: 30_000,
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
            msg_id: 1,
        }
    }
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_max_content_size(mut self, size: u64) -> Self {
        self.max_content_size = size;
        self
    }

    pub fn with_msg_id(mut self, msg_id: u32) -> Self {
        self.msg_id = msg_id;
        self
    }

    /// Returns the call timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("ACRPC_CONFIG") {
            Ok(path) => Self::load_from(path)?,
            Err(_) => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file and applies environment variable overrides on top.
    /// The result is not validated.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_with(path, |key| std::env::var(key).ok())
    }

    fn load_from_with(
        path: impl AsRef<Path>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(var);
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("ACRPC_ADDR") {
            self.addr = addr;
        }

        if let Some(ms) = var("ACRPC_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.timeout_ms = ms;
        }

        if let Some(size) = var("ACRPC_MAX_PAYLOAD").and_then(|v| v.parse().ok()) {
            self.max_payload_size = size;
        }

        if let Some(size) = var("ACRPC_MAX_CONTENT").and_then(|v| v.parse().ok()) {
            self.max_content_size = size;
        }

        if let Some(id) = var("ACRPC_MSG_ID").and_then(|v| v.parse().ok()) {
            self.msg_id = id;
        }
    }

    /// Checks that the configuration can be used for calls.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(ConfigError::Validation("addr must not be empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    Parse(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
