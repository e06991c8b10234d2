//! The broker: service registry, message engine and reactor.

pub mod config;
pub mod engine;
pub mod module;
pub mod registry;
pub mod service;
pub mod worker;

pub use config::BrokerConfig;
pub use engine::BrokerEngine;
pub use module::{Broker, BrokerState};
pub use registry::ServiceRegistry;
pub use service::{IdleQueue, Service};
pub use worker::{Worker, WorkerId, WorkerKey};
