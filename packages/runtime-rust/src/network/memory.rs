//! `inproc://` transport: routers and dealers in the same process.
//!
//! Bound routers are registered in a process-wide hub keyed by name. A dealer
//! looks its router up at connect time, registers a bounded inbox under its
//! identity, and from then on exchanges messages over channels only.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use majordomo_core::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::config::ConnectionConfig;
use crate::error::TransportError;
use crate::traits::FrameSocket;

/// Per-peer inboxes of a router, keyed by identity frame.
pub(super) type Peers = Arc<DashMap<Bytes, mpsc::Sender<Message>>>;

#[derive(Clone)]
struct RouterEntry {
    inbound: mpsc::Sender<(Bytes, Message)>,
    peers: Peers,
}

static HUB: LazyLock<DashMap<String, RouterEntry>> = LazyLock::new(DashMap::new);

pub(super) fn map_try_send<T>(err: &TrySendError<T>) -> TransportError {
    match err {
        TrySendError::Full(_) => TransportError::ChannelFull,
        TrySendError::Closed(_) => TransportError::Disconnected,
    }
}

/// Pops the routing frame and queues the rest to that peer's inbox.
pub(super) fn route_to_peer(peers: &Peers, mut message: Message) -> Result<(), TransportError> {
    let identity = message
        .pop_front()
        .ok_or(TransportError::MissingRoutingFrame)?;
    let peer = peers.get(&identity).ok_or_else(|| {
        TransportError::UnknownPeer(String::from_utf8_lossy(&identity).into_owned())
    })?;
    peer.try_send(message).map_err(|e| map_try_send(&e))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Router side of an `inproc://` endpoint.
pub struct MemoryRouter {
    name: String,
    endpoint: String,
    inbound: mpsc::Receiver<(Bytes, Message)>,
    peers: Peers,
    closed: bool,
}

impl MemoryRouter {
    /// Registers `name` in the hub.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AddrInUse`] if another router holds the name.
    pub fn bind(name: &str, config: &ConnectionConfig) -> Result<Self, TransportError> {
        let endpoint = format!("inproc://{name}");
        match HUB.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TransportError::AddrInUse(endpoint)),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::channel(config.channel_capacity());
                let peers: Peers = Arc::new(DashMap::new());
                slot.insert(RouterEntry {
                    inbound: tx,
                    peers: Arc::clone(&peers),
                });
                tracing::debug!(%endpoint, "inproc router bound");
                Ok(Self {
                    name: name.to_string(),
                    endpoint,
                    inbound: rx,
                    peers,
                    closed: false,
                })
            }
        }
    }

    /// Number of dealers currently connected.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl FrameSocket for MemoryRouter {
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
        if self.closed {
            return;
        }
        self.closed = true;
        HUB.remove_if(&self.name, |_, entry| Arc::ptr_eq(&entry.peers, &self.peers));
        // Dropping the inbox senders ends every connected dealer's recv().
        self.peers.clear();
        self.inbound.close();
        tracing::debug!(endpoint = %self.endpoint, "inproc router closed");
    }
}

impl Drop for MemoryRouter {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Dealer
// ---------------------------------------------------------------------------

/// Dealer side of an `inproc://` endpoint.
pub struct MemoryDealer {
    identity: Bytes,
    endpoint: String,
    outbound: Option<mpsc::Sender<(Bytes, Message)>>,
    inbox: mpsc::Receiver<Message>,
    peers: Peers,
}

impl MemoryDealer {
    /// Connects to the router bound at `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionRefused`] if no router is bound.
    pub fn connect(
        name: &str,
        identity: Bytes,
        config: &ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let endpoint = format!("inproc://{name}");
        let entry = HUB
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransportError::ConnectionRefused(endpoint.clone()))?;

        let (tx, rx) = mpsc::channel(config.channel_capacity());
        if entry.peers.insert(identity.clone(), tx).is_some() {
            tracing::warn!(%endpoint, "identity reused; previous dealer replaced");
        }
        Ok(Self {
            identity,
            endpoint,
            outbound: Some(entry.inbound),
            inbox: rx,
            peers: entry.peers,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &Bytes {
        &self.identity
    }
}

#[async_trait]
impl FrameSocket for MemoryDealer {
    async fn recv(&mut self) -> Option<Message> {
        self.inbox.recv().await
    }

    fn try_send(&self, message: Message) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Disconnected)?;
        outbound
            .try_send((self.identity.clone(), message))
            .map_err(|e| map_try_send(&e))
    }

    fn local_endpoint(&self) -> &str {
        &self.endpoint
    }

    fn close(&mut self) {
        if self.outbound.take().is_some() {
            self.inbox.close();
            // A newer dealer may have taken over this identity.
            self.peers
                .remove_if(&self.identity, |_, inbox| inbox.is_closed());
        }
    }
}

impl Drop for MemoryDealer {
    fn drop(&mut self) {
        self.close();
    }
}
