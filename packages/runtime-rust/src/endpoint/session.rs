//! Endpoint session state and the reactor shared by workers and clients.
//!
//! A session runs two timers. The heartbeat timer fires every interval and
//! queues a HEARTBEAT for the broker. The liveness timer fires every
//! [`HEARTBEAT_LIVELINESS`] intervals and counts down; any inbound message
//! from the broker resets the countdown, and a tick that finds it at zero
//! ends the session.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use majordomo_core::{Message, HEARTBEAT_LIVELINESS};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{Instant, MissedTickBehavior};

use super::config::{liveness_interval, EndpointConfig};
use crate::error::{ConfigError, EndpointError};
use crate::events::EventSink;
use crate::network::connection::deliver;
use crate::network::{connect, OutboundQueue, ShutdownSignal};

/// Where an endpoint is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// READY queued, nothing heard back yet.
    ReadyAnnounced,
    Idle,
    HandlingRequest,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ReadyAnnounced => "ready-announced",
            Self::Idle => "idle",
            Self::HandlingRequest => "handling-request",
        })
    }
}

/// Observable session flags. Readable from any thread.
#[derive(Debug)]
pub struct Session {
    state: ArcSwap<SessionState>,
    running: AtomicBool,
    connected: AtomicBool,
    remaining: AtomicU32,
}

impl Session {
    fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(SessionState::Disconnected),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            remaining: AtomicU32::new(HEARTBEAT_LIVELINESS),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Liveness ticks left before the session gives up on the broker.
    #[must_use]
    pub fn remaining_liveness(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(Arc::new(state));
    }

    fn reset_liveness(&self) {
        self.remaining.store(HEARTBEAT_LIVELINESS, Ordering::SeqCst);
    }

    /// One liveness tick. Returns `true` when the countdown was already
    /// exhausted.
    fn liveness_tick(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

/// What the reactor does after handling an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Role-specific behaviour plugged into [`EndpointCore::run`].
pub(crate) trait SessionHandler {
    /// Name used in the startup banner, e.g. `"Worker"`.
    fn title(&self) -> &'static str;

    /// Called once the transport is connected, before the first timer tick.
    fn on_connected(&self);

    /// Message queued on every heartbeat tick.
    fn heartbeat(&self) -> Message;

    /// Handles one message from the broker. The liveness countdown has
    /// already been reset.
    fn on_inbound(&self, message: Message) -> Flow;

    /// Whether delivering this outbound message ends the session.
    fn ends_session(&self, _outbound: &Message) -> bool {
        false
    }
}

/// Connection settings, outbound queue and session flags of one endpoint.
pub(crate) struct EndpointCore {
    role: &'static str,
    config: EndpointConfig,
    identity: Bytes,
    heartbeat_ms: AtomicU64,
    pub(crate) events: EventSink,
    pub(crate) session: Session,
    pub(crate) outbound: OutboundQueue,
    outbound_rx: Mutex<Option<UnboundedReceiver<Message>>>,
}

impl EndpointCore {
    pub(crate) fn new(role: &'static str, config: EndpointConfig, events: EventSink) -> Self {
        let (outbound, rx) = OutboundQueue::new("broker", events.clone());
        Self {
            role,
            identity: config.resolve_identity(),
            heartbeat_ms: AtomicU64::new(config.heartbeat_interval_ms),
            config,
            events,
            session: Session::new(),
            outbound,
            outbound_rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn identity(&self) -> &Bytes {
        &self.identity
    }

    pub(crate) fn broker_address(&self) -> &str {
        &self.config.broker_address
    }

    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn set_heartbeat_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        if self.session.is_running() {
            return Err(ConfigError::ReconfigureWhileRunning("heartbeat interval"));
        }
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(ConfigError::ZeroHeartbeatInterval);
        }
        self.heartbeat_ms.store(millis, Ordering::SeqCst);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn take_outbound(&self) -> Option<UnboundedReceiver<Message>> {
        self.outbound_rx.lock().take()
    }

    fn activate(&self) -> Result<Activation<'_>, ConfigError> {
        if self
            .session
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConfigError::AlreadyRunning(self.role));
        }
        let Some(outbound) = self.outbound_rx.lock().take() else {
            self.session.running.store(false, Ordering::SeqCst);
            return Err(ConfigError::AlreadyRunning(self.role));
        };
        self.session.reset_liveness();
        Ok(Activation {
            core: self,
            outbound,
        })
    }

    /// Connects, runs the reactor until shutdown, liveness expiry or a
    /// session-ending message, then tears the connection down.
    pub(crate) async fn run<H>(
        &self,
        handler: &H,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), EndpointError>
    where
        H: SessionHandler + Sync,
    {
        let mut activation = self.activate()?;
        self.session.set_state(SessionState::Connecting);
        let mut socket = match connect(
            &self.config.broker_address,
            self.identity.clone(),
            &self.config.connection,
        )
        .await
        {
            Ok(socket) => socket,
            Err(err) => {
                self.events.error(format!(
                    "Can't connect to {}: {err}",
                    self.config.broker_address
                ));
                return Err(err.into());
            }
        };
        self.session.connected.store(true, Ordering::SeqCst);
        self.events.info(format!(
            "MD {}/{} is active.",
            handler.title(),
            env!("CARGO_PKG_VERSION")
        ));
        handler.on_connected();

        let interval = self.heartbeat_interval();
        let liveness_period = liveness_interval(interval);
        let start = Instant::now();
        let mut heartbeat = tokio::time::interval_at(start + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = tokio::time::interval_at(start + liveness_period, liveness_period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.events.info("Starting to listen for incoming messages ...");
        let mut orderly = true;
        loop {
            tokio::select! {
                () = shutdown.recv() => break,
                inbound = socket.recv() => match inbound {
                    Some(message) => {
                        tracing::debug!(role = self.role, %message, "received from broker");
                        self.session.reset_liveness();
                        if handler.on_inbound(message) == Flow::Stop {
                            orderly = false;
                            break;
                        }
                    }
                    None => {
                        self.events.error("Connection to the broker was lost");
                        orderly = false;
                        break;
                    }
                },
                Some(message) = activation.outbound.recv() => {
                    let last = handler.ends_session(&message);
                    deliver(socket.as_ref(), message, "broker", &self.events);
                    if last {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    self.outbound.enqueue(handler.heartbeat());
                }
                _ = liveness.tick() => {
                    if self.session.liveness_tick() {
                        self.events.info("The service has stopped because of without heartbeat");
                        orderly = false;
                        break;
                    }
                }
            }
        }

        if orderly {
            while let Ok(message) = activation.outbound.try_recv() {
                deliver(socket.as_ref(), message, "broker", &self.events);
            }
        }
        socket.close();
        self.events.info("... Stopped!");
        Ok(())
    }
}

/// Marks a run in progress. Dropping it, on any exit path, hands the outbound
/// receiver back and resets the session flags.
struct Activation<'a> {
    core: &'a EndpointCore,
    outbound: UnboundedReceiver<Message>,
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        let (_, placeholder) = mpsc::unbounded_channel();
        let outbound = std::mem::replace(&mut self.outbound, placeholder);
        *self.core.outbound_rx.lock() = Some(outbound);

        let session = &self.core.session;
        session.set_state(SessionState::Disconnected);
        session.connected.store(false, Ordering::SeqCst);
        session.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_expires_after_liveliness_ticks() {
        let session = Session::new();
        for expected in (0..HEARTBEAT_LIVELINESS).rev() {
            assert!(!session.liveness_tick());
            assert_eq!(session.remaining_liveness(), expected);
        }
        assert!(session.liveness_tick());
        assert_eq!(session.remaining_liveness(), 0);

        session.reset_liveness();
        assert_eq!(session.remaining_liveness(), HEARTBEAT_LIVELINESS);
    }

    #[test]
    fn state_is_shared_across_threads() {
        let session = Arc::new(Session::new());
        let writer = Arc::clone(&session);
        std::thread::spawn(move || writer.set_state(SessionState::Idle))
            .join()
            .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.state().to_string(), "idle");
    }

    #[test]
    fn activation_is_exclusive_and_released_on_drop() {
        let core = EndpointCore::new(
            "worker",
            EndpointConfig::new("inproc://unused"),
            EventSink::new(crate::events::Role::Worker),
        );
        let first = core.activate().unwrap();
        assert!(core.session.is_running());
        assert_eq!(
            core.activate().err(),
            Some(ConfigError::AlreadyRunning("worker"))
        );
        assert_eq!(
            core.set_heartbeat_interval(Duration::from_millis(10)),
            Err(ConfigError::ReconfigureWhileRunning("heartbeat interval"))
        );

        drop(first);
        assert!(!core.session.is_running());
        assert!(core.activate().is_ok());
    }

    #[test]
    fn messages_queued_before_activation_are_kept_in_order() {
        let core = EndpointCore::new(
            "client",
            EndpointConfig::new("inproc://unused"),
            EventSink::new(crate::events::Role::Client),
        );
        assert!(core.outbound.enqueue(Message::from("first")));
        assert!(core.outbound.enqueue(Message::from("second")));

        let mut activation = core.activate().unwrap();
        assert_eq!(activation.outbound.try_recv().unwrap(), Message::from("first"));
        assert_eq!(activation.outbound.try_recv().unwrap(), Message::from("second"));
        assert!(activation.outbound.try_recv().is_err());
    }
}
