//! Typed wire messages for the four traffic directions.
//!
//! Each type encodes to and decodes from the protocol frames that follow the
//! routing envelope, i.e. everything after `[identity][empty]` on a ROUTER
//! socket and after the leading `[empty]` on a DEALER socket:
//!
//! | Type | Frames |
//! |---|---|
//! | [`WorkerToBroker`] | `[MDPW01][cmd][...]` |
//! | [`BrokerToWorker`] | `[MDPW01][cmd][...]` |
//! | [`ClientToBroker`] | `[MDPC01][cmd][...]` |
//! | [`BrokerToClient`] | `[cmd][...]` (no header) |

mod client;
mod worker;

pub use client::{BrokerToClient, ClientToBroker};
pub use worker::{BrokerToWorker, WorkerToBroker};

use bytes::Bytes;

use crate::command::{Command, ProtocolHeader};
use crate::error::ProtocolError;
use crate::message::Message;

/// Pops and validates the header frame.
fn take_header(message: &mut Message) -> Result<ProtocolHeader, ProtocolError> {
    let frame = message.pop_front().ok_or(ProtocolError::TooFewFrames)?;
    ProtocolHeader::from_frame(&frame)
}

/// Pops and validates the command frame.
fn take_command(message: &mut Message) -> Result<Command, ProtocolError> {
    let frame = message.pop_front().ok_or(ProtocolError::TooFewFrames)?;
    Command::from_frame(&frame)
}

/// Pops a frame and reads it as text, replacing invalid UTF-8.
fn take_text(message: &mut Message) -> Result<String, ProtocolError> {
    let frame = message.pop_front().ok_or(ProtocolError::TooFewFrames)?;
    Ok(frame_text(&frame))
}

/// Reads a frame as text, replacing invalid UTF-8.
#[must_use]
pub fn frame_text(frame: &Bytes) -> String {
    String::from_utf8_lossy(frame).into_owned()
}

/// Prefixes `[header][command]` in front of the argument frames.
fn with_prologue(header: Option<ProtocolHeader>, command: Command, mut args: Message) -> Message {
    args.push_front(command.to_frame());
    if let Some(header) = header {
        args.push_front(header.to_frame());
    }
    args
}
