use std::time::Duration;

use bytes::Bytes;
use majordomo_core::HEARTBEAT_LIVELINESS;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::{random_identity, ConnectionConfig};

/// Settings shared by worker and client endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Broker endpoint URI, e.g. `tcp://127.0.0.1:5556`.
    pub broker_address: String,
    /// Fixed routing identity. A random one is generated when unset.
    pub identity: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub connection: ConnectionConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            broker_address: String::new(),
            identity: None,
            heartbeat_interval_ms: 2_500,
            connection: ConnectionConfig::default(),
        }
    }
}

impl EndpointConfig {
    #[must_use]
    pub fn new(broker_address: impl Into<String>) -> Self {
        Self {
            broker_address: broker_address.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// The routing identity to connect with: the configured one, or a fresh
    /// random one. Blank identities count as unset.
    #[must_use]
    pub fn resolve_identity(&self) -> Bytes {
        match self.identity.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Bytes::from(id.to_string()),
            _ => random_identity(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyBrokerAddress`] for a blank address,
    /// [`ConfigError::ZeroHeartbeatInterval`] for a zero interval, or the
    /// connection settings' error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_address.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerAddress);
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        self.connection.validate()
    }
}

/// Interval of the liveness timer: one countdown step per
/// [`HEARTBEAT_LIVELINESS`] heartbeats.
#[must_use]
pub fn liveness_interval(heartbeat_interval: Duration) -> Duration {
    heartbeat_interval * HEARTBEAT_LIVELINESS
}

/// Worker endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub endpoint: EndpointConfig,
    /// Service announced in READY.
    pub service_name: String,
}

impl WorkerConfig {
    #[must_use]
    pub fn new(broker_address: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointConfig::new(broker_address),
            service_name: service_name.into(),
        }
    }

    /// # Errors
    ///
    /// Returns the endpoint's [`ConfigError`], or
    /// [`ConfigError::EmptyServiceName`] for a blank service name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint.validate()?;
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        Ok(())
    }
}
