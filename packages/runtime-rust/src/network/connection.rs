//! Outbound queue between callers and a role's reactor.
//!
//! Any task or thread may enqueue; only the reactor that owns the socket
//! drains the receiver and writes to the transport, preserving enqueue order
//! as wire order.

use majordomo_core::Message;
use tokio::sync::mpsc;

use crate::events::EventSink;
use crate::traits::FrameSocket;

/// Producer half of a role's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    /// Destination name used in events, e.g. `"workers"` or `"broker"`.
    destination: &'static str,
    tx: mpsc::UnboundedSender<Message>,
    events: EventSink,
}

impl OutboundQueue {
    /// Creates a queue and the receiver its reactor drains.
    #[must_use]
    pub fn new(
        destination: &'static str,
        events: EventSink,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                destination,
                tx,
                events,
            },
            rx,
        )
    }

    /// Queues a message for the reactor without blocking.
    ///
    /// Returns `false` if the reactor has stopped and the message was dropped.
    pub fn enqueue(&self, message: Message) -> bool {
        let text = format!("Enqueue {message} to {}", self.destination);
        if self.tx.send(message).is_ok() {
            self.events.info(text);
            true
        } else {
            self.events
                .error(format!("Dropped {text}: the reactor has stopped"));
            false
        }
    }

    /// Whether the draining reactor is still alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Writes one dequeued message to `socket`. Failures are reported with the
/// attempted message and not retried.
pub(crate) fn deliver(
    socket: &dyn FrameSocket,
    message: Message,
    destination: &str,
    events: &EventSink,
) {
    let text = message.to_string();
    match socket.try_send(message) {
        Ok(()) => tracing::debug!(destination, "Send to {destination} -> true, {text}"),
        Err(err) => events.error(format!("Send to {destination} -> false ({err}), {text}")),
    }
}
