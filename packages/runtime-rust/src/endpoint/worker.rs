//! Worker endpoint.
//!
//! Announces a service to the broker, surfaces forwarded requests on a
//! channel, and sends replies back through the broker with the client's
//! envelope restored.

use std::time::Duration;

use bytes::Bytes;
use majordomo_core::messages::frame_text;
use majordomo_core::{
    envelope, BrokerToWorker, Command, Message, ProtocolHeader, WorkerToBroker,
};
use tokio::sync::mpsc;

use super::config::WorkerConfig;
use super::session::{EndpointCore, Flow, Session, SessionHandler, SessionState};
use crate::error::{ConfigError, EndpointError};
use crate::events::{EventSink, Role};
use crate::network::ShutdownSignal;

/// A client request forwarded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    /// The client's routing identity; needed to address the reply.
    pub client: Bytes,
    pub body: Message,
}

pub struct WorkerEndpoint {
    service_name: String,
    core: EndpointCore,
    requests: mpsc::UnboundedSender<WorkerRequest>,
}

impl WorkerEndpoint {
    /// Creates a worker and the channel its requests arrive on.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the broker address or service name is
    /// blank or the heartbeat interval is zero.
    pub fn new(
        config: WorkerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerRequest>), ConfigError> {
        config.validate()?;
        let (requests, rx) = mpsc::unbounded_channel();
        let worker = Self {
            service_name: config.service_name,
            core: EndpointCore::new("worker", config.endpoint, EventSink::new(Role::Worker)),
            requests,
        };
        Ok((worker, rx))
    }

    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The routing identity this worker connects with.
    #[must_use]
    pub fn identity(&self) -> &Bytes {
        self.core.identity()
    }

    #[must_use]
    pub fn broker_address(&self) -> &str {
        self.core.broker_address()
    }

    #[must_use]
    pub fn events(&self) -> &EventSink {
        &self.core.events
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.core.session
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.core.heartbeat_interval()
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ReconfigureWhileRunning`] while `run()` is in
    /// progress, or [`ConfigError::ZeroHeartbeatInterval`].
    pub fn set_heartbeat_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        self.core.set_heartbeat_interval(interval)
    }

    /// Connects, announces the service and serves until `shutdown` fires, the
    /// broker goes silent, or the broker tells this worker to disconnect.
    ///
    /// There is no automatic reconnect; call `run()` again to re-register.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyRunning`] if another `run()` is in
    /// progress, or a transport error if the broker cannot be reached.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<(), EndpointError> {
        self.core.run(self, shutdown).await
    }

    /// Queues `[empty][MDPW01][command][data][message...]` for the broker.
    ///
    /// `data` and `message` are optional: READY carries the service name as
    /// `data`, REPLY carries `[client][empty][body]` as `message`, HEARTBEAT
    /// and DISCONNECT carry neither.
    pub fn send(&self, command: Command, data: Option<&str>, message: Option<Message>) -> bool {
        let mut frames = message.unwrap_or_default();
        if let Some(data) = data {
            frames.push_front(data.to_string());
        }
        frames.push_front(command.to_frame());
        frames.push_front(ProtocolHeader::Worker.to_frame());
        frames.push_front(envelope::delimiter());
        self.core.outbound.enqueue(frames)
    }

    /// Answers `request`. The client's envelope is restored so the broker can
    /// route the reply.
    pub fn reply(&self, request: &WorkerRequest, body: Message) -> bool {
        let queued = self.enqueue(WorkerToBroker::Reply {
            client: request.client.clone(),
            body,
        });
        if self.session().state() == SessionState::HandlingRequest {
            self.session().set_state(SessionState::Idle);
        }
        queued
    }

    /// Tells the broker this worker is leaving. The session ends once the
    /// message has been written.
    pub fn disconnect(&self) -> bool {
        self.enqueue(WorkerToBroker::Disconnect)
    }

    fn enqueue(&self, message: WorkerToBroker) -> bool {
        let mut frames = message.encode(ProtocolHeader::Worker);
        frames.push_front(envelope::delimiter());
        self.core.outbound.enqueue(frames)
    }
}

impl SessionHandler for WorkerEndpoint {
    fn title(&self) -> &'static str {
        "Worker"
    }

    fn on_connected(&self) {
        self.enqueue(WorkerToBroker::Ready {
            service: self.service_name.clone(),
        });
        self.session().set_state(SessionState::ReadyAnnounced);
    }

    fn heartbeat(&self) -> Message {
        let mut frames = WorkerToBroker::Heartbeat.encode(ProtocolHeader::Worker);
        frames.push_front(envelope::delimiter());
        frames
    }

    fn on_inbound(&self, mut message: Message) -> Flow {
        envelope::strip_delimiter(&mut message);
        match BrokerToWorker::decode(message) {
            Ok(BrokerToWorker::Request { client, body }) => {
                self.session().set_state(SessionState::HandlingRequest);
                self.events().info(format!(
                    "Received the request: {body} from client: {}",
                    frame_text(&client)
                ));
                if self.requests.send(WorkerRequest { client, body }).is_err() {
                    self.events()
                        .error("Request dropped: nobody is receiving requests");
                }
                Flow::Continue
            }
            Ok(BrokerToWorker::Heartbeat) => {
                if self.session().state() == SessionState::ReadyAnnounced {
                    self.session().set_state(SessionState::Idle);
                }
                self.enqueue(WorkerToBroker::Heartbeat);
                Flow::Continue
            }
            Ok(BrokerToWorker::Disconnect) => {
                self.events()
                    .info("Disconnect received from the broker; the worker must register again");
                Flow::Stop
            }
            Err(err) => {
                self.events()
                    .error(format!("Invalid message received from the broker: {err}"));
                Flow::Continue
            }
        }
    }

    fn ends_session(&self, outbound: &Message) -> bool {
        outbound.len() == 3 && outbound.get(2) == Some(&Command::Disconnect.to_frame())
    }
}
