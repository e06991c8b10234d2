//! Endpoint URIs and socket construction.
//!
//! Two schemes are understood:
//! - `inproc://<name>` -- a process-local hub, see [`memory`](super::memory)
//! - `tcp://<host>:<port>` -- a TCP listener or stream, see [`tcp`](super::tcp)

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use super::config::ConnectionConfig;
use super::memory::{MemoryDealer, MemoryRouter};
use super::tcp::{TcpDealer, TcpRouter};
use crate::error::TransportError;
use crate::traits::FrameSocket;

/// A parsed endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Inproc(String),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let unsupported = || TransportError::UnsupportedEndpoint(uri.to_string());
        let (scheme, rest) = uri.split_once("://").ok_or_else(unsupported)?;
        if rest.is_empty() {
            return Err(unsupported());
        }
        match scheme {
            "inproc" => Ok(Self::Inproc(rest.to_string())),
            "tcp" if rest.contains(':') => Ok(Self::Tcp(rest.to_string())),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inproc(name) => write!(f, "inproc://{name}"),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Binds a router-side socket at `uri`.
///
/// # Errors
///
/// Returns [`TransportError::UnsupportedEndpoint`] for an unknown scheme,
/// [`TransportError::AddrInUse`] if the name or port is taken, or an I/O error.
pub async fn bind(
    uri: &str,
    config: &ConnectionConfig,
) -> Result<Box<dyn FrameSocket>, TransportError> {
    match uri.parse::<Endpoint>()? {
        Endpoint::Inproc(name) => Ok(Box::new(MemoryRouter::bind(&name, config)?)),
        Endpoint::Tcp(addr) => Ok(Box::new(TcpRouter::bind(&addr, config).await?)),
    }
}

/// Connects a dealer-side socket carrying `identity` to the router at `uri`.
///
/// # Errors
///
/// Returns [`TransportError::UnsupportedEndpoint`] for an unknown scheme,
/// [`TransportError::ConnectionRefused`] if nothing is bound there, or an
/// I/O error.
pub async fn connect(
    uri: &str,
    identity: Bytes,
    config: &ConnectionConfig,
) -> Result<Box<dyn FrameSocket>, TransportError> {
    match uri.parse::<Endpoint>()? {
        Endpoint::Inproc(name) => Ok(Box::new(MemoryDealer::connect(&name, identity, config)?)),
        Endpoint::Tcp(addr) => Ok(Box::new(TcpDealer::connect(&addr, identity, config).await?)),
    }
}

/// A fresh peer identity for dealers that were not given one.
#[must_use]
pub fn random_identity() -> Bytes {
    Bytes::from(uuid::Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_schemes() {
        assert_eq!(
            "inproc://broker".parse::<Endpoint>().unwrap(),
            Endpoint::Inproc("broker".to_string())
        );
        assert_eq!(
            "tcp://127.0.0.1:5555".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:5555".to_string())
        );
    }

    #[test]
    fn display_round_trips() {
        let endpoint: Endpoint = "tcp://localhost:0".parse().unwrap();
        assert_eq!(endpoint.to_string(), "tcp://localhost:0");
    }

    #[test]
    fn rejects_unknown_or_incomplete_uris() {
        for uri in ["", "broker", "ipc:///tmp/x", "inproc://", "tcp://localhost"] {
            assert!(
                matches!(
                    uri.parse::<Endpoint>(),
                    Err(TransportError::UnsupportedEndpoint(_))
                ),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn random_identities_are_distinct() {
        let a = random_identity();
        let b = random_identity();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
