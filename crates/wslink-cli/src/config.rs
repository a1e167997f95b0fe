//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use wslink_ws::{ConnectionConfig, ReconnectPolicy, Role};

/// Connection section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSection {
    /// Target address (`ws://` or `wss://`).
    #[serde(default)]
    pub address: String,
    /// Wait for the server to confirm a close before forcing it.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            address: String::new(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations that cannot produce a working client.
    pub fn validate(&self) -> AppResult<()> {
        if self.connection.address.is_empty() {
            return Err(AppError::Config(
                "connection.address is not set (use --address or the config file)".to_string(),
            ));
        }
        if self.connection.close_timeout_ms == 0 {
            return Err(AppError::Config(
                "connection.close_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            role: Role::Client,
            reconnect: self.reconnect.clone(),
            close_timeout_ms: self.connection.close_timeout_ms,
        }
    }
}
