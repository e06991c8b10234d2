//! Status payload the broker returns in place of a worker reply.
//!
//! Codes follow the gRPC status code numbering. The text form is
//! `ErrorCode:<code>, ErrorMsg:<message>` and travels as a single body frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Message sent when a service has no idle worker.
pub const NO_WORKER_MESSAGE: &str = "There is no worker for the service";

/// gRPC-style status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    NotFound = 5,
    Unavailable = 14,
}

impl StatusCode {
    /// Numeric code.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(code: u8) -> Option<Self> {
        match code {
            5 => Some(Self::NotFound),
            14 => Some(Self::Unavailable),
            _ => None,
        }
    }
}

/// A broker-generated status reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub code: StatusCode,
    pub message: String,
}

impl ServiceStatus {
    /// The reply sent when a request finds no idle worker for its service.
    #[must_use]
    pub fn no_worker() -> Self {
        Self {
            code: StatusCode::Unavailable,
            message: NO_WORKER_MESSAGE.to_string(),
        }
    }

    /// Encodes as a one-frame reply body.
    #[must_use]
    pub fn to_body(&self) -> Message {
        Message::from(self.to_string())
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode:{}, ErrorMsg:{}", self.code.as_u8(), self.message)
    }
}

/// Error returned when a reply body is not a status payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a status payload")]
pub struct NotAStatus;

impl FromStr for ServiceStatus {
    type Err = NotAStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("ErrorCode:").ok_or(NotAStatus)?;
        let (code, message) = rest.split_once(", ErrorMsg:").ok_or(NotAStatus)?;
        let code = code
            .parse::<u8>()
            .ok()
            .and_then(StatusCode::from_u8)
            .ok_or(NotAStatus)?;
        Ok(Self {
            code,
            message: message.to_string(),
        })
    }
}
