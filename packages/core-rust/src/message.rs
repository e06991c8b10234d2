//! Multipart messages: an ordered sequence of opaque binary frames.
//!
//! Every protocol unit exchanged between broker, workers and clients is a
//! [`Message`]. Frames are [`Bytes`] so that pushing a routing envelope or
//! forwarding a body between sockets never copies the payload.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

/// An ordered sequence of frames. The front frame is the first on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: VecDeque<Bytes>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from frames, first frame first.
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the message carries no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Prepends a frame.
    pub fn push_front(&mut self, frame: impl Into<Bytes>) {
        self.frames.push_front(frame.into());
    }

    /// Appends a frame.
    pub fn push_back(&mut self, frame: impl Into<Bytes>) {
        self.frames.push_back(frame.into());
    }

    /// Removes and returns the first frame.
    pub fn pop_front(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    /// Borrows the first frame without removing it.
    #[must_use]
    pub fn front(&self) -> Option<&Bytes> {
        self.frames.front()
    }

    /// Borrows the frame at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    /// Iterates over the frames in wire order.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.frames.iter()
    }

    /// Moves every frame of `other` to the back of this message.
    pub fn append(&mut self, mut other: Message) {
        self.frames.append(&mut other.frames);
    }

    /// Total payload size in bytes, excluding any framing overhead.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Consumes the message, returning its frames in wire order.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames.into()
    }
}

impl From<Bytes> for Message {
    fn from(frame: Bytes) -> Self {
        Self::from_frames([frame])
    }
}

impl From<&'static str> for Message {
    fn from(frame: &'static str) -> Self {
        Self::from_frames([Bytes::from_static(frame.as_bytes())])
    }
}

impl From<String> for Message {
    fn from(frame: String) -> Self {
        Self::from_frames([Bytes::from(frame)])
    }
}

impl FromIterator<Bytes> for Message {
    fn from_iter<T: IntoIterator<Item = Bytes>>(iter: T) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Message {
    type Item = Bytes;
    type IntoIter = std::collections::vec_deque::IntoIter<Bytes>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// Renders a frame for log output: printable UTF-8 verbatim, anything else as hex.
pub(crate) fn frame_display(frame: &[u8]) -> String {
    match std::str::from_utf8(frame) {
        Ok(text) if text.chars().all(|c| !c.is_control()) => text.to_string(),
        _ => {
            let mut hex = String::with_capacity(2 + frame.len() * 2);
            hex.push_str("0x");
            for byte in frame {
                hex.push_str(&format!("{byte:02x}"));
            }
            hex
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message[")?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", frame_display(frame))?;
        }
        write!(f, "]")
    }
}
