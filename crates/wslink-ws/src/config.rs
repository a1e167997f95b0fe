//! Connection configuration.

use crate::reconnect::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use wslink_core::Role;

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Role of this instance. Only clients may connect.
    #[serde(default)]
    pub role: Role,
    /// Automatic reconnection after unexpected closes.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the transport to confirm a requested close
    /// before forcing the connection closed. Default: 5,000.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            reconnect: ReconnectPolicy::default(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
