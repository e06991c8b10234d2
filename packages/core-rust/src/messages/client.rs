use super::{take_command, take_header, take_text, with_prologue};
use crate::command::{Command, ProtocolHeader};
use crate::error::ProtocolError;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Client -> Broker
// ---------------------------------------------------------------------------

/// A message sent by a client to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientToBroker {
    /// `[0x02][service][body...]`
    Request { service: String, body: Message },
    /// `[0x04]`
    Heartbeat,
}

impl ClientToBroker {
    /// The command byte this message carries.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Request { .. } => Command::Request,
            Self::Heartbeat => Command::Heartbeat,
        }
    }

    /// Encodes as `[MDPC01][cmd][...]`.
    #[must_use]
    pub fn encode(self) -> Message {
        let command = self.command();
        let args = match self {
            Self::Request { service, mut body } => {
                body.push_front(service);
                body
            }
            Self::Heartbeat => Message::new(),
        };
        with_prologue(Some(ProtocolHeader::Client), command, args)
    }

    /// Decodes `[MDPC01][cmd][...]` as received by the broker's client-facing
    /// socket once the routing envelope has been removed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for a non-client header, a missing or
    /// malformed command frame, a REQUEST lacking a service name or body, or a
    /// command clients never send.
    pub fn decode(mut message: Message) -> Result<Self, ProtocolError> {
        let header = take_header(&mut message)?;
        if header != ProtocolHeader::Client {
            return Err(ProtocolError::InvalidHeader(header.to_string()));
        }
        match take_command(&mut message)? {
            Command::Request => {
                if message.len() < 2 {
                    return Err(ProtocolError::Malformed(
                        "request needs a service name and a body",
                    ));
                }
                let service = take_text(&mut message)?;
                Ok(Self::Request {
                    service,
                    body: message,
                })
            }
            Command::Heartbeat => Ok(Self::Heartbeat),
            other => Err(ProtocolError::UnexpectedCommand {
                command: other,
                direction: "client-to-broker",
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Broker -> Client
// ---------------------------------------------------------------------------

/// A message sent by the broker to a client. Carries no protocol header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerToClient {
    /// `[0x03][service][body...]`
    Reply { service: String, body: Message },
    /// `[0x04]`
    Heartbeat,
}

impl BrokerToClient {
    /// The command byte this message carries.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Reply { .. } => Command::Reply,
            Self::Heartbeat => Command::Heartbeat,
        }
    }

    /// Encodes as `[cmd][...]`.
    #[must_use]
    pub fn encode(self) -> Message {
        let command = self.command();
        let args = match self {
            Self::Reply { service, mut body } => {
                body.push_front(service);
                body
            }
            Self::Heartbeat => Message::new(),
        };
        with_prologue(None, command, args)
    }

    /// Decodes `[cmd][...]` as received by a client once the leading delimiter
    /// has been removed.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for a missing or malformed command frame, a
    /// REPLY without a service name, or a command the broker never sends to
    /// clients.
    pub fn decode(mut message: Message) -> Result<Self, ProtocolError> {
        match take_command(&mut message)? {
            Command::Reply => {
                let service = take_text(&mut message)?;
                Ok(Self::Reply {
                    service,
                    body: message,
                })
            }
            Command::Heartbeat => Ok(Self::Heartbeat),
            other => Err(ProtocolError::UnexpectedCommand {
                command: other,
                direction: "broker-to-client",
            }),
        }
    }
}
