use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::error::PeerError;
use crate::message::Message;

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// A remote node over a TCP connection.
///
/// The stream is split so that the transport's read loop and any number of
/// senders can use the connection at the same time. The remote address is
/// the peer's identity.
pub struct TcpPeer {
    remote_addr: SocketAddr,
    direction: Direction,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
}

impl TcpPeer {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, direction: Direction) -> Self {
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            remote_addr,
            direction,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Outbound
    }

    /// Write raw bytes to the peer.
    pub async fn send(&self, data: &[u8]) -> Result<(), PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write a framed message to the peer.
    pub async fn send_message(&self, message: &Message) -> Result<(), PeerError> {
        let frame = message.encode_frame()?;
        self.send(&frame).await
    }

    /// Exclusive access to the read half. The transport holds this for the
    /// whole read loop once the peer is active; handshakes use it briefly
    /// before that.
    pub async fn reader(&self) -> MutexGuard<'_, OwnedReadHalf> {
        self.reader.lock().await
    }

    /// Close the connection. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    pub async fn close(&self) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }
        // The write half shuts down with a FIN; the read loop notices the
        // closed flag through `closed()`.
        let _ = self.writer.lock().await.shutdown().await;
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the peer has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpPeer")
            .field("remote_addr", &self.remote_addr)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The set of currently active peers, keyed by remote address.
///
/// Connection tasks insert a peer once its handshake succeeds and remove it
/// when the connection ends.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<SocketAddr, Arc<TcpPeer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, returning any peer previously held under the same
    /// address.
    pub fn insert(&self, peer: Arc<TcpPeer>) -> Option<Arc<TcpPeer>> {
        self.peers
            .write()
            .expect("peer registry lock poisoned")
            .insert(peer.remote_addr(), peer)
    }

    /// Remove `peer` if it is still the one registered under its address.
    /// Returns `true` if this call removed it.
    pub fn remove(&self, peer: &Arc<TcpPeer>) -> bool {
        let mut peers = self.peers.write().expect("peer registry lock poisoned");
        match peers.get(&peer.remote_addr()) {
            Some(current) if Arc::ptr_eq(current, peer) => {
                peers.remove(&peer.remote_addr());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<TcpPeer>> {
        self.peers
            .read()
            .expect("peer registry lock poisoned")
            .get(addr)
            .cloned()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.peers
            .read()
            .expect("peer registry lock poisoned")
            .contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("peer registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted addresses of all registered peers.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self
            .peers
            .read()
            .expect("peer registry lock poisoned")
            .keys()
            .copied()
            .collect();
        addrs.sort();
        addrs
    }

    /// Remove and return every registered peer.
    pub fn drain(&self) -> Vec<Arc<TcpPeer>> {
        self.peers
            .write()
            .expect("peer registry lock poisoned")
            .drain()
            .map(|(_, peer)| peer)
            .collect()
    }
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.addrs())
            .finish()
    }
}
