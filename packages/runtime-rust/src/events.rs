//! Info and error event channels.
//!
//! Every role owns an [`EventSink`]. Each call emits a `tracing` event and
//! fans the same text out to any subscribers over a broadcast channel, so
//! callers can observe state transitions without installing a subscriber.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The role that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broker,
    Worker,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Broker => "broker",
            Self::Worker => "worker",
            Self::Client => "client",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// A single human-readable event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub role: Role,
    pub level: LogLevel,
    pub text: String,
}

/// Fan-out point for a role's info and error events.
#[derive(Debug, Clone)]
pub struct EventSink {
    role: Role,
    tx: broadcast::Sender<LogEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(role: Role) -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { role, tx }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns a receiver for events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.tx.subscribe()
    }

    /// Emits an info event. Blank text is ignored.
    pub fn info(&self, text: impl Into<String>) {
        self.emit(LogLevel::Info, text.into());
    }

    /// Emits an error event. Blank text is ignored.
    pub fn error(&self, text: impl Into<String>) {
        self.emit(LogLevel::Error, text.into());
    }

    fn emit(&self, level: LogLevel, text: String) {
        if text.trim().is_empty() {
            return;
        }
        match level {
            LogLevel::Info => tracing::info!(role = %self.role, "{text}"),
            LogLevel::Error => tracing::error!(role = %self.role, "{text}"),
        }
        // No subscribers is not an error.
        let _ = self.tx.send(LogEvent {
            role: self.role,
            level,
            text,
        });
    }
}
