//! Transports, outbound queues and shutdown control.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod memory;
pub mod shutdown;
pub mod tcp;

pub use config::*;
pub use connection::OutboundQueue;
pub use endpoint::{bind, connect, random_identity, Endpoint};
pub use memory::{MemoryDealer, MemoryRouter};
pub use shutdown::*;
pub use tcp::{MultipartCodec, TcpDealer, TcpRouter};
