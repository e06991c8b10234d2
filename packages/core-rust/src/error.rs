//! Protocol-level errors raised while decoding inbound frames.

use crate::command::Command;

/// A malformed or unexpected message. Always recoverable: the offending
/// message is dropped and the connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message with too few frames received")]
    TooFewFrames,
    #[error("command frame must be exactly one byte, got {len}")]
    MalformedCommand { len: usize },
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("command {command} is not valid for {direction} traffic")]
    UnexpectedCommand {
        command: Command,
        direction: &'static str,
    },
    #[error("message with invalid protocol header '{0}'")]
    InvalidHeader(String),
    #[error("message is malformed: {0}")]
    Malformed(&'static str),
}
