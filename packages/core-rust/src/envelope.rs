//! Routing envelopes.
//!
//! A ROUTER-side socket identifies peers by an identity frame. To carry a
//! return address through an intermediary, the address is pushed in front of
//! the payload followed by an empty delimiter frame:
//!
//! ```text
//! [routing frame][empty][...payload]
//! ```
//!
//! [`wrap`] and [`unwrap`] are the only way envelopes are built and removed, so
//! a client's address nested inside a worker-bound request comes back out
//! unchanged when the worker replies.

use bytes::Bytes;

use crate::message::Message;

/// The empty delimiter frame separating an envelope from its payload.
#[must_use]
pub fn delimiter() -> Bytes {
    Bytes::new()
}

/// Pushes `routing` and an empty delimiter in front of `message`.
///
/// A zero-length routing frame leaves the message untouched.
#[must_use]
pub fn wrap(routing: &Bytes, mut message: Message) -> Message {
    if !routing.is_empty() {
        message.push_front(delimiter());
        message.push_front(routing.clone());
    }
    message
}

/// Pops the first frame, plus the following frame if it is the empty delimiter.
///
/// Returns `None` when the message has no frames.
pub fn unwrap(message: &mut Message) -> Option<Bytes> {
    let frame = message.pop_front()?;
    if message.front().is_some_and(Bytes::is_empty) {
        message.pop_front();
    }
    Some(frame)
}

/// Drops a leading empty delimiter, as left in front of a message received by a
/// DEALER-side socket.
pub fn strip_delimiter(message: &mut Message) {
    if message.front().is_some_and(Bytes::is_empty) {
        message.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn wrap_prepends_routing_and_delimiter() {
        let wrapped = wrap(&Bytes::from_static(b"client-7"), Message::from("body"));
        assert_eq!(
            wrapped,
            Message::from_frames([
                Bytes::from_static(b"client-7"),
                Bytes::new(),
                Bytes::from_static(b"body")
            ])
        );
    }

    #[test]
    fn wrap_with_empty_routing_is_noop() {
        let original = Message::from_frames(["a", "b"]);
        assert_eq!(wrap(&Bytes::new(), original.clone()), original);
    }

    #[test]
    fn unwrap_without_delimiter_pops_one_frame() {
        let mut msg = Message::from_frames(["id", "payload"]);
        assert_eq!(unwrap(&mut msg).unwrap(), Bytes::from_static(b"id"));
        assert_eq!(msg, Message::from("payload"));
    }

    #[test]
    fn unwrap_empty_message_returns_none() {
        assert!(unwrap(&mut Message::new()).is_none());
    }

    #[test]
    fn strip_delimiter_only_removes_empty_front() {
        let mut msg = Message::from_frames([Bytes::new(), Bytes::from_static(b"x")]);
        strip_delimiter(&mut msg);
        assert_eq!(msg, Message::from("x"));

        strip_delimiter(&mut msg);
        assert_eq!(msg, Message::from("x"));
    }

    fn frame() -> impl Strategy<Value = Bytes> {
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Bytes::from)
    }

    proptest! {
        #[test]
        fn unwrap_restores_wrapped_message(
            routing in prop::collection::vec(any::<u8>(), 1..16).prop_map(Bytes::from),
            frames in prop::collection::vec(frame(), 0..6),
        ) {
            let mut message = Message::from_frames(frames);
            let original = message.clone();
            message = wrap(&routing, message);

            prop_assert_eq!(unwrap(&mut message), Some(routing));
            prop_assert_eq!(message, original);
        }
    }
}
