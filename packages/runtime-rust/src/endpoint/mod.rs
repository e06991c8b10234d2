//! Worker and client endpoints.
//!
//! Both roles share one session reactor (see [`session`]) and differ only in
//! what they announce on connect and how they handle broker messages.

pub mod client;
pub mod config;
pub mod session;
pub mod worker;

pub use client::{ClientEndpoint, ClientReply};
pub use config::{liveness_interval, EndpointConfig, WorkerConfig};
pub use session::{Session, SessionState};
pub use worker::{WorkerEndpoint, WorkerRequest};
