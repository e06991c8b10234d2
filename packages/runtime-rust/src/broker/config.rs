use std::time::Duration;

use majordomo_core::HEARTBEAT_LIVELINESS;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::ConnectionConfig;

/// Broker configuration.
///
/// Clients connect to `client_endpoint`, workers to `worker_endpoint`. Both
/// are endpoint URIs (`tcp://host:port` or `inproc://name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub client_endpoint: String,
    pub worker_endpoint: String,
    /// Interval between expiry sweeps and worker heartbeats in milliseconds.
    pub heartbeat_interval_ms: u64,
    pub connection: ConnectionConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_endpoint: "tcp://127.0.0.1:5555".to_string(),
            worker_endpoint: "tcp://127.0.0.1:5556".to_string(),
            heartbeat_interval_ms: 2_500,
            connection: ConnectionConfig::default(),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// How long a worker stays registered without being heard from.
    #[must_use]
    pub fn heartbeat_expiry(&self) -> Duration {
        self.heartbeat_interval() * HEARTBEAT_LIVELINESS
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] if either endpoint is empty, the heartbeat
    /// interval is zero or the connection settings are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("client"));
        }
        if self.worker_endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("worker"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        self.connection.validate()
    }
}
