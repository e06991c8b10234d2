//! Command bytes and protocol header markers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::frame_display;

/// One-byte command carried in the frame following the protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Kill = 0x00,
    Ready = 0x01,
    Request = 0x02,
    Reply = 0x03,
    Heartbeat = 0x04,
    Disconnect = 0x05,
    /// Reserved; never produced or accepted by the broker flows.
    Token = 0x06,
}

impl Command {
    /// The command as its wire byte.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// The command as a single-byte frame.
    #[must_use]
    pub fn to_frame(self) -> Bytes {
        Bytes::copy_from_slice(&[self.as_byte()])
    }

    /// Parses a command frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedCommand`] if the frame is not exactly
    /// one byte and [`ProtocolError::UnknownCommand`] for unassigned values.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match frame {
            [byte] => Self::try_from(*byte),
            _ => Err(ProtocolError::MalformedCommand { len: frame.len() }),
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Kill),
            0x01 => Ok(Self::Ready),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Reply),
            0x04 => Ok(Self::Heartbeat),
            0x05 => Ok(Self::Disconnect),
            0x06 => Ok(Self::Token),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kill => "KILL",
            Self::Ready => "READY",
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Heartbeat => "HEARTBEAT",
            Self::Disconnect => "DISCONNECT",
            Self::Token => "TOKEN",
        };
        f.write_str(name)
    }
}

/// Protocol-version marker distinguishing client from worker traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolHeader {
    /// `MDPC01`, sent by clients.
    Client,
    /// `MDPW01`, sent by workers and by the broker to workers.
    Worker,
    /// `MDPS01`, a worker variant whose READY registers `"{service}-MDPS01"`.
    Service,
}

impl ProtocolHeader {
    pub const CLIENT: &'static str = "MDPC01";
    pub const WORKER: &'static str = "MDPW01";
    pub const SERVICE: &'static str = "MDPS01";

    /// The marker string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => Self::CLIENT,
            Self::Worker => Self::WORKER,
            Self::Service => Self::SERVICE,
        }
    }

    /// The marker as a frame.
    #[must_use]
    pub fn to_frame(self) -> Bytes {
        Bytes::from_static(self.as_str().as_bytes())
    }

    /// Parses a header frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidHeader`] for any unrecognised marker.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        match frame {
            b"MDPC01" => Ok(Self::Client),
            b"MDPW01" => Ok(Self::Worker),
            b"MDPS01" => Ok(Self::Service),
            other => Err(ProtocolError::InvalidHeader(frame_display(other))),
        }
    }
}

impl fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_match_wire_values() {
        let expected = [
            (Command::Kill, 0x00),
            (Command::Ready, 0x01),
            (Command::Request, 0x02),
            (Command::Reply, 0x03),
            (Command::Heartbeat, 0x04),
            (Command::Disconnect, 0x05),
            (Command::Token, 0x06),
        ];
        for (command, byte) in expected {
            assert_eq!(command.as_byte(), byte);
            assert_eq!(Command::try_from(byte).unwrap(), command);
        }
    }

    #[test]
    fn command_frame_must_be_one_byte() {
        assert_eq!(
            Command::from_frame(&[0x01, 0x02]),
            Err(ProtocolError::MalformedCommand { len: 2 })
        );
        assert_eq!(
            Command::from_frame(&[]),
            Err(ProtocolError::MalformedCommand { len: 0 })
        );
        assert_eq!(
            Command::from_frame(&[0x7f]),
            Err(ProtocolError::UnknownCommand(0x7f))
        );
    }

    #[test]
    fn header_round_trips_and_rejects_unknown_markers() {
        for header in [
            ProtocolHeader::Client,
            ProtocolHeader::Worker,
            ProtocolHeader::Service,
        ] {
            assert_eq!(ProtocolHeader::from_frame(&header.to_frame()).unwrap(), header);
        }
        assert_eq!(
            ProtocolHeader::from_frame(b"MDPX01"),
            Err(ProtocolError::InvalidHeader("MDPX01".to_string()))
        );
    }
}
