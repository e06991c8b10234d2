//! `tcp://` transport.
//!
//! Messages travel length-prefixed: a big-endian `u32` frame count, then for
//! each frame a big-endian `u32` length followed by the frame bytes. A dealer
//! opens every connection with a one-frame message carrying its identity;
//! the router uses it to route replies back over that connection.
//!
//! Each accepted connection runs in its own task that pumps between the
//! socket and two channels, so the router itself never awaits I/O.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use majordomo_core::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::config::ConnectionConfig;
use super::memory::{map_try_send, route_to_peer, Peers};
use super::shutdown::{ShutdownController, ShutdownSignal};
use crate::error::TransportError;
use crate::traits::FrameSocket;

const PREFIX_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Multipart message codec for `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct MultipartCodec {
    max_message_bytes: usize,
}

impl MultipartCodec {
    #[must_use]
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }

    fn too_large(&self, size: usize) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "multipart message of {size} bytes exceeds limit of {}",
                self.max_message_bytes
            ),
        )
    }
}

fn read_u32(src: &[u8], offset: usize) -> Option<usize> {
    let mut prefix = src.get(offset..offset + PREFIX_LEN)?;
    Some(prefix.get_u32() as usize)
}

impl Decoder for MultipartCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        let Some(count) = read_u32(src, 0) else {
            return Ok(None);
        };

        // Walk the length prefixes first so nothing is consumed until the
        // whole message has arrived.
        let mut offset = PREFIX_LEN;
        for _ in 0..count {
            let Some(len) = read_u32(src, offset) else {
                return Ok(None);
            };
            offset = offset
                .saturating_add(PREFIX_LEN)
                .saturating_add(len);
            if offset > self.max_message_bytes {
                return Err(self.too_large(offset));
            }
        }
        if src.len() < offset {
            src.reserve(offset - src.len());
            return Ok(None);
        }

        let mut buf = src.split_to(offset).freeze();
        buf.advance(PREFIX_LEN);
        let mut message = Message::new();
        for _ in 0..count {
            let len = buf.get_u32() as usize;
            message.push_back(buf.split_to(len));
        }
        Ok(Some(message))
    }
}

impl Encoder<Message> for MultipartCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), io::Error> {
        let size = PREFIX_LEN + PREFIX_LEN * message.len() + message.byte_len();
        if size > self.max_message_bytes {
            return Err(self.too_large(size));
        }
        let count = u32::try_from(message.len()).map_err(|_| self.too_large(size))?;

        dst.reserve(size);
        dst.put_u32(count);
        for frame in message {
            let len = u32::try_from(frame.len()).map_err(|_| self.too_large(size))?;
            dst.put_u32(len);
            dst.extend_from_slice(&frame);
        }
        Ok(())
    }
}

fn refused_or_io(err: io::Error, endpoint: &str) -> TransportError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(endpoint.to_string()),
        io::ErrorKind::AddrInUse => TransportError::AddrInUse(endpoint.to_string()),
        _ => TransportError::Io(err),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Router side of a `tcp://` endpoint.
pub struct TcpRouter {
    endpoint: String,
    inbound: mpsc::Receiver<(Bytes, Message)>,
    peers: Peers,
    shutdown: ShutdownController,
}

impl TcpRouter {
    /// Binds a listener on `addr` (`host:port`, port 0 for an ephemeral port)
    /// and starts accepting peers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AddrInUse`] if the port is taken, or the
    /// underlying I/O error.
    pub async fn bind(addr: &str, config: &ConnectionConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| refused_or_io(e, &format!("tcp://{addr}")))?;
        let endpoint = format!("tcp://{}", listener.local_addr()?);

        let (tx, rx) = mpsc::channel(config.channel_capacity());
        let peers: Peers = Arc::new(DashMap::new());
        let shutdown = ShutdownController::new();

        tokio::spawn(accept_loop(
            listener,
            tx,
            Arc::clone(&peers),
            config.clone(),
            shutdown.signal(),
        ));
        tracing::info!(%endpoint, "TCP listener bound");

        Ok(Self {
            endpoint,
            inbound: rx,
            peers,
            shutdown,
        })
    }

    /// Number of peers that completed the identity handshake.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    inbound: mpsc::Sender<(Bytes, Message)>,
    peers: Peers,
    config: ConnectionConfig,
    mut signal: ShutdownSignal,
) {
    loop {
        tokio::select! {
            () = signal.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tracing::debug!(%remote, "peer connected");
                    tokio::spawn(serve_peer(
                        stream,
                        inbound.clone(),
                        Arc::clone(&peers),
                        config.clone(),
                        signal.clone(),
                    ));
                }
                Err(err) => tracing::warn!(%err, "accept failed"),
            },
        }
    }
}

/// Reads the identity handshake, then pumps frames until either side closes.
async fn serve_peer(
    stream: TcpStream,
    inbound: mpsc::Sender<(Bytes, Message)>,
    peers: Peers,
    config: ConnectionConfig,
    mut signal: ShutdownSignal,
) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::warn!(%err, "failed to set TCP_NODELAY on accepted connection");
    }
    let mut framed = Framed::new(stream, MultipartCodec::new(config.max_message_bytes));

    let hello = tokio::select! {
        () = signal.recv() => return,
        hello = framed.next() => hello,
    };
    let Some(identity) = hello.and_then(Result::ok).and_then(handshake_identity) else {
        tracing::warn!("peer closed or sent an invalid identity handshake");
        return;
    };

    let (tx, mut outbound) = mpsc::channel(config.channel_capacity());
    if peers.insert(identity.clone(), tx).is_some() {
        tracing::warn!("identity reused; previous connection replaced");
    }

    loop {
        tokio::select! {
            () = signal.recv() => break,
            incoming = framed.next() => match incoming {
                Some(Ok(message)) => {
                    if inbound.send((identity.clone(), message)).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(%err, "dropping peer after read error");
                    break;
                }
                None => break,
            },
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = framed.send(message).await {
                        tracing::warn!(%err, "dropping peer after write error");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Only remove the entry if it is still ours, not a newer connection's.
    drop(outbound);
    peers.remove_if(&identity, |_, tx| tx.is_closed());
}

fn handshake_identity(mut hello: Message) -> Option<Bytes> {
    if hello.len() != 1 {
        return None;
    }
    hello.pop_front().filter(|frame| !frame.is_empty())
}

#[async_trait]
impl FrameSocket for TcpRouter {
    async fn recv(&mut self) -> Option<Message> {
        let (identity, mut message) = self.inbound.recv().await?;
        message.push_front(identity);
        Some(message)
    }

    fn try_send(&self, message: Message) -> Result<(), TransportError> {
        route_to_peer(&self.peers, message)
    }

    fn local_endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        if self.shutdown.is_triggered() {
            return;
        }
        self.shutdown.trigger_shutdown();
        self.peers.clear();
        self.inbound.close();
        tracing::info!(endpoint = %self.endpoint, "TCP listener closed");
    }
}

impl Drop for TcpRouter {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Dealer
// ---------------------------------------------------------------------------

/// Dealer side of a `tcp://` endpoint.
pub struct TcpDealer {
    endpoint: String,
    outbound: mpsc::Sender<Message>,
    inbox: mpsc::Receiver<Message>,
    shutdown: ShutdownController,
}

impl TcpDealer {
    /// Connects to `addr` and sends the identity handshake.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionRefused`] if nothing listens at
    /// `addr`, or the underlying I/O error.
    pub async fn connect(
        addr: &str,
        identity: Bytes,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let endpoint = format!("tcp://{addr}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| refused_or_io(e, &endpoint))?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, MultipartCodec::new(config.max_message_bytes));
        framed.send(Message::from(identity)).await?;

        let (out_tx, out_rx) = mpsc::channel(config.channel_capacity());
        let (in_tx, in_rx) = mpsc::channel(config.channel_capacity());
        let shutdown = ShutdownController::new();
        tokio::spawn(pump(framed, out_rx, in_tx, shutdown.signal()));

        Ok(Self {
            endpoint,
            outbound: out_tx,
            inbox: in_rx,
            shutdown,
        })
    }
}

async fn pump(
    mut framed: Framed<TcpStream, MultipartCodec>,
    mut outbound: mpsc::Receiver<Message>,
    inbox: mpsc::Sender<Message>,
    mut signal: ShutdownSignal,
) {
    loop {
        tokio::select! {
            () = signal.recv() => break,
            incoming = framed.next() => match incoming {
                Some(Ok(message)) => {
                    if inbox.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(%err, "connection read error");
                    break;
                }
                None => break,
            },
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = framed.send(message).await {
                        tracing::warn!(%err, "connection write error");
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

#[async_trait]
impl FrameSocket for TcpDealer {
    async fn recv(&mut self) -> Option<Message> {
        self.inbox.recv().await
    }

    fn try_send(&self, message: Message) -> Result<(), TransportError> {
        if self.shutdown.is_triggered() {
            return Err(TransportError::Disconnected);
        }
        self.outbound.try_send(message).map_err(|e| map_try_send(&e))
    }

    fn local_endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        if !self.shutdown.is_triggered() {
            self.shutdown.trigger_shutdown();
            self.inbox.close();
        }
    }
}

impl Drop for TcpDealer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn codec() -> MultipartCodec {
        MultipartCodec::new(1024)
    }

    #[test]
    fn encodes_count_then_length_prefixed_frames() {
        let mut buf = BytesMut::new();
        codec()
            .encode(Message::from_frames(["", "ab"]), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b'][..]
        );
    }

    #[test]
    fn decode_waits_for_complete_message() {
        let mut full = BytesMut::new();
        codec()
            .encode(Message::from_frames(["MDPW01", "x"]), &mut full)
            .unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec().decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 1, "nothing consumed");

        partial.extend_from_slice(&full[full.len() - 1..]);
        let message = codec().decode(&mut partial).unwrap().unwrap();
        assert_eq!(message, Message::from_frames(["MDPW01", "x"]));
        assert!(partial.is_empty());
    }

    #[test]
    fn decode_leaves_following_message_in_buffer() {
        let mut buf = BytesMut::new();
        codec().encode(Message::from("a"), &mut buf).unwrap();
        codec().encode(Message::from("b"), &mut buf).unwrap();

        assert_eq!(codec().decode(&mut buf).unwrap().unwrap(), Message::from("a"));
        assert_eq!(codec().decode(&mut buf).unwrap().unwrap(), Message::from("b"));
        assert!(codec().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_messages_are_rejected_both_ways() {
        let mut small = MultipartCodec::new(16);
        let big = Message::from(Bytes::from(vec![0u8; 64]));

        let mut buf = BytesMut::new();
        assert!(small.encode(big.clone(), &mut buf).is_err());

        let mut wire = BytesMut::new();
        codec().encode(big, &mut wire).unwrap();
        let err = small.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn dealer_and_router_exchange_over_loopback() {
        let config = ConnectionConfig::default();
        let mut router = TcpRouter::bind("127.0.0.1:0", &config).await.unwrap();
        let addr = router
            .local_endpoint()
            .strip_prefix("tcp://")
            .unwrap()
            .to_string();

        let mut dealer = TcpDealer::connect(&addr, Bytes::from_static(b"w1"), &config)
            .await
            .unwrap();
        dealer
            .try_send(Message::from_frames(["", "MDPW01", "hi"]))
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), router.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::from_frames(["w1", "", "MDPW01", "hi"]));

        router
            .try_send(Message::from_frames(["w1", "", "back"]))
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), dealer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, Message::from_frames(["", "back"]));
    }

    #[tokio::test]
    async fn closing_router_disconnects_dealer() {
        let config = ConnectionConfig::default();
        let mut router = TcpRouter::bind("127.0.0.1:0", &config).await.unwrap();
        let addr = router
            .local_endpoint()
            .strip_prefix("tcp://")
            .unwrap()
            .to_string();
        let mut dealer = TcpDealer::connect(&addr, Bytes::from_static(b"d"), &config)
            .await
            .unwrap();

        // Wait for the handshake so the peer task is running.
        dealer.try_send(Message::from("ping")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), router.recv())
            .await
            .unwrap()
            .unwrap();

        router.close();
        let end = tokio::time::timeout(Duration::from_secs(5), dealer.recv())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn connecting_to_closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result =
            TcpDealer::connect(&addr, Bytes::from_static(b"c"), &ConnectionConfig::default())
                .await;
        assert!(matches!(result, Err(TransportError::ConnectionRefused(_))));
    }
}
