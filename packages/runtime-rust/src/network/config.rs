//! Transport-level configuration shared by all roles.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest multipart message on the wire: the frame count and one frame
/// length prefix.
pub const MIN_MESSAGE_BYTES: usize = 8;

/// Per-socket settings controlling backpressure and frame limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bounded channel capacity for messages queued to one peer. A full
    /// channel drops the message.
    pub outbound_channel_capacity: usize,
    /// Largest multipart message accepted from a TCP peer, in bytes of
    /// frame payload plus length prefixes.
    pub max_message_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            max_message_bytes: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

impl ConnectionConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroChannelCapacity`] or
    /// [`ConfigError::MessageLimitTooSmall`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.max_message_bytes < MIN_MESSAGE_BYTES {
            return Err(ConfigError::MessageLimitTooSmall(MIN_MESSAGE_BYTES));
        }
        Ok(())
    }

    /// Capacity for a bounded peer channel. Never zero.
    pub(crate) fn channel_capacity(&self) -> usize {
        self.outbound_channel_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.outbound_channel_capacity, 256);
        assert_eq!(config.max_message_bytes, 16_777_216);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "outbound_channel_capacity": 8 }"#).unwrap();
        assert_eq!(config.outbound_channel_capacity, 8);
        assert_eq!(config.max_message_bytes, 16_777_216);
    }

    #[test]
    fn zero_capacity_and_tiny_message_limit_are_rejected() {
        assert!(ConnectionConfig::default().validate().is_ok());

        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "outbound_channel_capacity": 0 }"#).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroChannelCapacity));
        assert_eq!(config.channel_capacity(), 1);

        let config = ConnectionConfig {
            max_message_bytes: MIN_MESSAGE_BYTES - 1,
            ..ConnectionConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MessageLimitTooSmall(MIN_MESSAGE_BYTES))
        );
        let config = ConnectionConfig {
            max_message_bytes: MIN_MESSAGE_BYTES,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
