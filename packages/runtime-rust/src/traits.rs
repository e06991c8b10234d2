use async_trait::async_trait;
use majordomo_core::Message;

use crate::error::TransportError;

/// A multipart message socket, bound (router side) or connected (dealer side).
///
/// Router sockets prepend the sending peer's identity frame to every received
/// message and route outgoing messages on their first frame, which is
/// consumed. Dealer sockets exchange messages with their single peer as-is.
///
/// Each role's reactor owns its sockets exclusively, so only `try_send` is
/// shared-borrow and never awaits.
#[async_trait]
pub trait FrameSocket: Send {
    /// Receives the next message. Returns `None` once the socket is closed.
    ///
    /// Must be cancel-safe: the reactor polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Message>;

    /// Hands a message to the transport without blocking.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the peer is unknown, its queue is
    /// full, or the socket is closed. Delivery is at-most-once.
    fn try_send(&self, message: Message) -> Result<(), TransportError>;

    /// The endpoint URI this socket is bound or connected to.
    fn local_endpoint(&self) -> &str;

    /// Releases the binding or connection. Idempotent.
    fn close(&mut self);
}
