//! Error types for the runtime layer.
//!
//! Protocol violations never surface here: the roles report them on their
//! event channel and drop the offending message. These types cover misuse of
//! the configuration API and transport failures, which are returned to the
//! caller synchronously.

use std::io;

/// Precondition violated at a configuration call. State is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("broker address must not be empty")]
    EmptyBrokerAddress,
    #[error("{0} endpoint must not be empty")]
    EmptyEndpoint(&'static str),
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("request must carry a service name and a non-empty body")]
    EmptyRequest,
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,
    #[error("outbound channel capacity must be greater than zero")]
    ZeroChannelCapacity,
    #[error("max_message_bytes must be at least {0} to hold one frame")]
    MessageLimitTooSmall(usize),
    #[error("can't start the same {0} more than once")]
    AlreadyRunning(&'static str),
    #[error("can't change {0} while the service is running")]
    ReconfigureWhileRunning(&'static str),
}

/// Failure reported by a [`FrameSocket`](crate::traits::FrameSocket)
/// implementation or while establishing one.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),
    #[error("address already in use: {0}")]
    AddrInUse(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("no route to peer {0}")]
    UnknownPeer(String),
    #[error("message has no routing frame")]
    MissingRoutingFrame,
    #[error("outbound channel full")]
    ChannelFull,
    #[error("socket disconnected")]
    Disconnected,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Failure starting or running a worker or client endpoint.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure starting or running the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("broker sockets are not bound; call start() first")]
    NotStarted,
}
