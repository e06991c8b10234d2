use bytes::Bytes;

use super::{take_command, take_header, take_text, with_prologue};
use crate::command::{Command, ProtocolHeader};
use crate::envelope;
use crate::error::ProtocolError;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Worker -> Broker
// ---------------------------------------------------------------------------

/// A message sent by a worker to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerToBroker {
    /// `[0x01][service]`: the worker is ready to serve `service`.
    Ready { service: String },
    /// `[0x03][client][empty][body]`: the answer to a forwarded request.
    Reply { client: Bytes, body: Message },
    /// `[0x04]`
    Heartbeat,
    /// `[0x05]`: the worker is leaving.
    Disconnect,
}

impl WorkerToBroker {
    /// The command byte this message carries.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Ready { .. } => Command::Ready,
            Self::Reply { .. } => Command::Reply,
            Self::Heartbeat => Command::Heartbeat,
            Self::Disconnect => Command::Disconnect,
        }
    }

    /// Encodes as `[header][cmd][...]`. Workers use [`ProtocolHeader::Worker`].
    #[must_use]
    pub fn encode(self, header: ProtocolHeader) -> Message {
        let command = self.command();
        let args = match self {
            Self::Ready { service } => Message::from(service),
            Self::Reply { client, body } => envelope::wrap(&client, body),
            Self::Heartbeat | Self::Disconnect => Message::new(),
        };
        with_prologue(Some(header), command, args)
    }

    /// Decodes `[header][cmd][...]` as received by the broker's worker-facing
    /// socket once the routing envelope has been removed.
    ///
    /// Both the worker and the service header are accepted; the header is
    /// returned so the broker can apply its service-header naming rule.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for a client header or unknown marker, a
    /// missing or malformed command frame, missing READY/REPLY arguments, or a
    /// command that workers never send.
    pub fn decode(mut message: Message) -> Result<(ProtocolHeader, Self), ProtocolError> {
        let header = take_header(&mut message)?;
        if header == ProtocolHeader::Client {
            return Err(ProtocolError::InvalidHeader(header.to_string()));
        }
        let command = take_command(&mut message)?;
        let decoded = match command {
            Command::Ready => Self::Ready {
                service: take_text(&mut message)?,
            },
            Command::Reply => {
                let client = envelope::unwrap(&mut message).ok_or(ProtocolError::TooFewFrames)?;
                Self::Reply {
                    client,
                    body: message,
                }
            }
            Command::Heartbeat => Self::Heartbeat,
            Command::Disconnect => Self::Disconnect,
            other => {
                return Err(ProtocolError::UnexpectedCommand {
                    command: other,
                    direction: "worker-to-broker",
                })
            }
        };
        Ok((header, decoded))
    }
}

// ---------------------------------------------------------------------------
// Broker -> Worker
// ---------------------------------------------------------------------------

/// A message sent by the broker to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerToWorker {
    /// `[0x02][client][empty][body]`: a client request to serve.
    Request { client: Bytes, body: Message },
    /// `[0x04]`
    Heartbeat,
    /// `[0x05]`: the broker no longer knows this worker.
    Disconnect,
}

impl BrokerToWorker {
    /// The command byte this message carries.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Request { .. } => Command::Request,
            Self::Heartbeat => Command::Heartbeat,
            Self::Disconnect => Command::Disconnect,
        }
    }

    /// Encodes as `[MDPW01][cmd][...]`.
    #[must_use]
    pub fn encode(self) -> Message {
        let command = self.command();
        let args = match self {
            Self::Request { client, body } => envelope::wrap(&client, body),
            Self::Heartbeat | Self::Disconnect => Message::new(),
        };
        with_prologue(Some(ProtocolHeader::Worker), command, args)
    }

    /// Decodes `[MDPW01][cmd][...]` as received by a worker once the leading
    /// delimiter has been removed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for a non-worker header, a missing or
    /// malformed command frame, a REQUEST without a client envelope, or a
    /// command the broker never sends to workers.
    pub fn decode(mut message: Message) -> Result<Self, ProtocolError> {
        let header = take_header(&mut message)?;
        if header != ProtocolHeader::Worker {
            return Err(ProtocolError::InvalidHeader(header.to_string()));
        }
        match take_command(&mut message)? {
            Command::Request => {
                let client = envelope::unwrap(&mut message).ok_or(ProtocolError::TooFewFrames)?;
                Ok(Self::Request {
                    client,
                    body: message,
                })
            }
            Command::Heartbeat => Ok(Self::Heartbeat),
            Command::Disconnect => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnexpectedCommand {
                command: other,
                direction: "broker-to-worker",
            }),
        }
    }
}
