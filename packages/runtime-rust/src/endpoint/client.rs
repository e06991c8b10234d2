//! Client endpoint.

use std::time::Duration;

use bytes::Bytes;
use majordomo_core::messages::frame_text;
use majordomo_core::{envelope, BrokerToClient, ClientToBroker, Message, ServiceStatus};
use tokio::sync::mpsc;

use super::config::EndpointConfig;
use super::session::{EndpointCore, Flow, Session, SessionHandler, SessionState};
use crate::error::{ConfigError, EndpointError};
use crate::events::{EventSink, Role};
use crate::network::ShutdownSignal;

/// A reply delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReply {
    pub service: String,
    pub body: Message,
}

impl ClientReply {
    /// The broker's status payload, if this reply is one rather than a worker
    /// answer.
    #[must_use]
    pub fn status(&self) -> Option<ServiceStatus> {
        match (self.body.len(), self.body.front()) {
            (1, Some(frame)) => frame_text(frame).parse().ok(),
            _ => None,
        }
    }
}

pub struct ClientEndpoint {
    core: EndpointCore,
    replies: mpsc::UnboundedSender<ClientReply>,
}

impl ClientEndpoint {
    /// Creates a client and the channel replies arrive on.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a blank broker address or a zero
    /// heartbeat interval.
    pub fn new(
        config: EndpointConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientReply>), ConfigError> {
        config.validate()?;
        let (replies, rx) = mpsc::unbounded_channel();
        let client = Self {
            core: EndpointCore::new("client", config, EventSink::new(Role::Client)),
            replies,
        };
        Ok((client, rx))
    }

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

    /// Connects and serves until `shutdown` fires or the broker goes silent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyRunning`] if another `run()` is in
    /// progress, or a transport error if the broker cannot be reached.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<(), EndpointError> {
        self.core.run(self, shutdown).await
    }

    /// Queues a request for `service`. Requests queued before `run()` are
    /// sent, in order, once the session connects.
    ///
    /// Returns `Ok(false)` if the queue refused the message.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyServiceName`] for a blank service name and
    /// [`ConfigError::EmptyRequest`] for an empty body. Nothing is queued.
    pub fn send(&self, service: &str, body: Message) -> Result<bool, ConfigError> {
        if service.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if body.is_empty() {
            return Err(ConfigError::EmptyRequest);
        }
        let mut frames = ClientToBroker::Request {
            service: service.to_string(),
            body,
        }
        .encode();
        frames.push_front(envelope::delimiter());
        Ok(self.core.outbound.enqueue(frames))
    }
}

impl SessionHandler for ClientEndpoint {
    fn title(&self) -> &'static str {
        "Client"
    }

    fn on_connected(&self) {
        self.session().set_state(SessionState::Idle);
    }

    fn heartbeat(&self) -> Message {
        let mut frames = ClientToBroker::Heartbeat.encode();
        frames.push_front(envelope::delimiter());
        frames
    }

    fn on_inbound(&self, mut message: Message) -> Flow {
        envelope::strip_delimiter(&mut message);
        match BrokerToClient::decode(message) {
            Ok(BrokerToClient::Reply { service, body }) => {
                self.events()
                    .info(format!("Received reply from service {service}: {body}"));
                if self.replies.send(ClientReply { service, body }).is_err() {
                    self.events()
                        .error("Reply dropped: nobody is receiving replies");
                }
            }
            Ok(BrokerToClient::Heartbeat) => {}
            Err(err) => self
                .events()
                .error(format!("Invalid message received from the broker: {err}")),
        }
        Flow::Continue
    }
}
