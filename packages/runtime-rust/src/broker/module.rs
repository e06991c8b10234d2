//! Broker lifecycle and reactor.
//!
//! Follows a deferred startup pattern:
//! 1. `new()` -- validates config, allocates the registry and event sink
//! 2. `start()` -- binds the client- and worker-facing sockets
//! 3. `serve()` -- runs the reactor until the shutdown signal fires
//!
//! The reactor is a single `select!` loop. It owns both sockets, so inbound
//! handling, outbound delivery and the heartbeat sweep never race each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use majordomo_core::Message;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::BrokerConfig;
use super::engine::BrokerEngine;
use super::registry::ServiceRegistry;
use super::worker::WorkerId;
use crate::error::{BrokerError, ConfigError};
use crate::events::{EventSink, Role};
use crate::network::connection::deliver;
use crate::network::{bind, OutboundQueue, ShutdownSignal};
use crate::traits::FrameSocket;

struct BoundSockets {
    clients: Box<dyn FrameSocket>,
    workers: Box<dyn FrameSocket>,
}

/// The Majordomo broker.
pub struct Broker {
    config: BrokerConfig,
    events: EventSink,
    state: BrokerState,
    sockets: Option<BoundSockets>,
}

impl Broker {
    /// Creates a broker without binding anything.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn new(config: BrokerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = ServiceRegistry::new(config.heartbeat_expiry());
        Ok(Self {
            config,
            events: EventSink::new(Role::Broker),
            state: BrokerState {
                registry: Arc::new(Mutex::new(registry)),
                running: Arc::new(AtomicBool::new(false)),
            },
            sockets: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// A shareable view of the registry that stays valid while `serve()`
    /// borrows the broker.
    #[must_use]
    pub fn state(&self) -> BrokerState {
        self.state.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval()
    }

    #[must_use]
    pub fn heartbeat_expiry(&self) -> Duration {
        self.config.heartbeat_expiry()
    }

    /// Changes the heartbeat interval. The expiry follows at three intervals.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReconfigureWhileRunning`] once `start()` has
    /// succeeded, or [`ConfigError::ZeroHeartbeatInterval`].
    pub fn set_heartbeat_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        if self.is_running() {
            return Err(ConfigError::ReconfigureWhileRunning("heartbeat interval"));
        }
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        self.config.heartbeat_interval_ms = millis;
        self.state
            .registry
            .lock()
            .set_expiry(self.config.heartbeat_expiry());
        Ok(())
    }

    /// Binds both sockets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyRunning`] if the broker is already
    /// started, or a [`TransportError`](crate::error::TransportError) if either
    /// endpoint cannot be bound. Nothing stays bound on failure.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.is_running() {
            return Err(ConfigError::AlreadyRunning("broker").into());
        }
        let connection = &self.config.connection;
        let clients = bind(&self.config.client_endpoint, connection).await?;
        let workers = bind(&self.config.worker_endpoint, connection).await?;

        self.events.info(format!(
            "Client socket bound to {}, worker socket bound to {}",
            clients.local_endpoint(),
            workers.local_endpoint()
        ));
        self.events.info(format!(
            "MD Broker/{} is active.",
            env!("CARGO_PKG_VERSION")
        ));
        self.sockets = Some(BoundSockets { clients, workers });
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// The bound client-facing endpoint, e.g. with the OS-assigned port.
    #[must_use]
    pub fn client_endpoint(&self) -> Option<&str> {
        self.sockets.as_ref().map(|s| s.clients.local_endpoint())
    }

    /// The bound worker-facing endpoint.
    #[must_use]
    pub fn worker_endpoint(&self) -> Option<&str> {
        self.sockets.as_ref().map(|s| s.workers.local_endpoint())
    }

    /// Runs the reactor until `shutdown` fires, then closes both sockets.
    ///
    /// Registry contents survive a stop; a later `start()` resumes with them.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotStarted`] if `start()` was not called.
    pub async fn serve(&mut self, mut shutdown: ShutdownSignal) -> Result<(), BrokerError> {
        let Some(mut sockets) = self.sockets.take() else {
            return Err(BrokerError::NotStarted);
        };

        let (worker_queue, mut to_workers) = OutboundQueue::new("workers", self.events.clone());
        let (client_queue, mut to_clients) = OutboundQueue::new("clients", self.events.clone());
        let engine = BrokerEngine::new(
            Arc::clone(&self.state.registry),
            worker_queue,
            client_queue,
            self.events.clone(),
        );

        let interval = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.events.info("Starting to listen for incoming messages ...");
        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                inbound = sockets.workers.recv() => match inbound {
                    Some(message) => engine.on_worker_message(message, Instant::now()),
                    None => {
                        self.events.error("Worker socket closed unexpectedly");
                        break;
                    }
                },
                inbound = sockets.clients.recv() => match inbound {
                    Some(message) => engine.on_client_message(message),
                    None => {
                        self.events.error("Client socket closed unexpectedly");
                        break;
                    }
                },
                Some(message) = to_workers.recv() => {
                    deliver(sockets.workers.as_ref(), message, "workers", &self.events);
                }
                Some(message) = to_clients.recv() => {
                    deliver(sockets.clients.as_ref(), message, "clients", &self.events);
                }
                _ = heartbeat.tick() => {
                    engine.on_heartbeat_tick(Instant::now());
                    tracing::debug!(interval_ms = self.config.heartbeat_interval_ms, "heartbeat sweep done");
                }
            }
        }

        // Whatever the handlers queued before the stop still goes out.
        flush(&mut to_workers, sockets.workers.as_ref(), "workers", &self.events);
        flush(&mut to_clients, sockets.clients.as_ref(), "clients", &self.events);

        sockets.workers.close();
        sockets.clients.close();
        self.state.running.store(false, Ordering::SeqCst);
        self.events.info("... Stopped!");
        Ok(())
    }

    /// `start()` followed by `serve()`.
    ///
    /// # Errors
    ///
    /// See [`Broker::start`].
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<(), BrokerError> {
        self.start().await?;
        self.serve(shutdown).await
    }
}

fn flush(
    queue: &mut UnboundedReceiver<Message>,
    socket: &dyn FrameSocket,
    destination: &str,
    events: &EventSink,
) {
    while let Ok(message) = queue.try_recv() {
        deliver(socket, message, destination, events);
    }
}

/// Read access to a broker's registry from outside the reactor.
#[derive(Debug, Clone)]
pub struct BrokerState {
    registry: Arc<Mutex<ServiceRegistry>>,
    running: Arc<AtomicBool>,
}

impl BrokerState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Known worker IDs in registration order.
    #[must_use]
    pub fn known_workers(&self) -> Vec<WorkerId> {
        self.registry
            .lock()
            .known_workers()
            .map(|worker| worker.id().clone())
            .collect()
    }

    /// Idle worker IDs of `service`, oldest first. Empty for unknown services.
    #[must_use]
    pub fn idle_workers(&self, service: &str) -> Vec<WorkerId> {
        self.registry.lock().service(service).map_or_else(Vec::new, |svc| {
            svc.idle().iter().map(|key| key.id.clone()).collect()
        })
    }

    /// Names of every service referenced so far, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.registry.lock().service_names()
    }
}
