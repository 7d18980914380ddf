use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::decoder::{Decoder, DecoderKind};
use crate::error::{CodecError, HandshakeError, TransportError, TransportResult};
use crate::handshake::{Handshake, HandshakeKind};
use crate::hooks::OnPeer;
use crate::message::Envelope;
use crate::peer::{Direction, PeerRegistry, TcpPeer};

pub const DEFAULT_LISTEN_ADDR: &str = ":3000";
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_DECODE_ERRORS: u32 = 16;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A node's view of the network: accept peers, dial peers, and hand every
/// decoded message to the owner through one stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the listen address and start accepting connections in the
    /// background. Returns the bound address.
    async fn listen_and_accept(&self) -> TransportResult<SocketAddr>;

    /// Take the stream of decoded messages. Only the first call gets it.
    fn consume(&self) -> Option<mpsc::Receiver<Envelope>>;

    /// Connect to a remote node, run the handshake, and start reading from it.
    async fn dial(&self, addr: &str) -> TransportResult<Arc<TcpPeer>>;

    /// Stop accepting, disconnect every peer, and wait for all connection
    /// tasks to finish.
    async fn close(&self);
}

/// Serializable transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpTransportConfig {
    pub listen_addr: String,
    pub decoder: DecoderKind,
    pub handshake: HandshakeKind,
    pub queue_capacity: usize,
    pub max_decode_errors: u32,
    pub handshake_timeout_secs: u64,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            decoder: DecoderKind::default(),
            handshake: HandshakeKind::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_decode_errors: DEFAULT_MAX_DECODE_ERRORS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT.as_secs(),
        }
    }
}

impl TcpTransportConfig {
    pub fn into_opts(self) -> TcpTransportOpts {
        TcpTransportOpts {
            listen_addr: self.listen_addr,
            handshake: self.handshake.build(),
            decoder: self.decoder.build(),
            on_peer: None,
            queue_capacity: self.queue_capacity,
            max_decode_errors: self.max_decode_errors,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }
}

/// Runtime options for a [`TcpTransport`].
#[derive(Clone)]
pub struct TcpTransportOpts {
    /// `host:port`; a bare `:port` listens on all interfaces.
    pub listen_addr: String,
    pub handshake: Arc<dyn Handshake>,
    pub decoder: Arc<dyn Decoder>,
    pub on_peer: Option<Arc<dyn OnPeer>>,
    /// Capacity of the envelope queue. A full queue suspends the producing
    /// peer's read loop until the consumer catches up or the transport
    /// closes.
    pub queue_capacity: usize,
    /// Consecutive non-terminal decode errors tolerated per connection.
    pub max_decode_errors: u32,
    pub handshake_timeout: Duration,
}

impl Default for TcpTransportOpts {
    fn default() -> Self {
        TcpTransportConfig::default().into_opts()
    }
}

/// Turn a listen address into something `TcpListener::bind` accepts.
pub fn normalize_listen_addr(addr: &str) -> TransportResult<String> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(TransportError::InvalidAddress("empty listen address".into()));
    }
    if addr.starts_with(':') {
        Ok(format!("0.0.0.0{addr}"))
    } else {
        Ok(addr.to_string())
    }
}

struct Inner {
    opts: TcpTransportOpts,
    peers: PeerRegistry,
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    conn_tasks: Mutex<JoinSet<()>>,
}

/// TCP implementation of [`Transport`].
///
/// Every connection moves through `accepted -> handshaking -> active ->
/// closed` on its own task, so one slow peer never holds up the accept loop
/// or any other peer.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    pub fn new(opts: TcpTransportOpts) -> Self {
        let (tx, rx) = mpsc::channel(opts.queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                opts,
                peers: PeerRegistry::new(),
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                shutdown,
                local_addr: Mutex::new(None),
                accept_task: Mutex::new(None),
                conn_tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn listen_addr(&self) -> &str {
        &self.inner.opts.listen_addr
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().expect("transport lock poisoned")
    }

    /// Addresses of all active peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.peers.addrs()
    }

    pub fn peer(&self, addr: &SocketAddr) -> Option<Arc<TcpPeer>> {
        self.inner.peers.get(addr)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen_and_accept(&self) -> TransportResult<SocketAddr> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self
            .inner
            .accept_task
            .lock()
            .expect("transport lock poisoned")
            .is_some()
        {
            return Err(TransportError::AlreadyListening);
        }

        let addr = normalize_listen_addr(&self.inner.opts.listen_addr)?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;

        let mut accept_task = self.inner.accept_task.lock().expect("transport lock poisoned");
        if accept_task.is_some() {
            return Err(TransportError::AlreadyListening);
        }
        *self.inner.local_addr.lock().expect("transport lock poisoned") = Some(local);
        *accept_task = Some(tokio::spawn(Arc::clone(&self.inner).accept_loop(listener)));
        info!(addr = %local, "transport listening");
        Ok(local)
    }

    fn consume(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.inner.rx.lock().expect("transport lock poisoned").take()
    }

    async fn dial(&self, addr: &str) -> TransportResult<Arc<TcpPeer>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        let remote = stream.peer_addr()?;
        info!(peer = %remote, "dialed peer");

        let peer = Arc::new(TcpPeer::new(stream, remote, Direction::Outbound));
        if let Err(e) = self.inner.activate(&peer).await {
            self.inner.drop_peer(&peer, &e.to_string()).await;
            return Err(e);
        }
        let inner = Arc::clone(&self.inner);
        let task_peer = Arc::clone(&peer);
        self.inner.spawn(async move { inner.run_peer(task_peer).await });
        Ok(peer)
    }

    async fn close(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        info!("transport shutting down");

        let accept_task = self
            .inner
            .accept_task
            .lock()
            .expect("transport lock poisoned")
            .take();
        if let Some(handle) = accept_task {
            let _ = handle.await;
        }

        for peer in self.inner.peers.drain() {
            peer.close().await;
        }

        let mut tasks = {
            let mut guard = self.inner.conn_tasks.lock().expect("transport lock poisoned");
            std::mem::take(&mut *guard)
        };
        while tasks.join_next().await.is_some() {}

        // Dropping the last sender ends the consumer's stream.
        self.inner.tx.lock().expect("transport lock poisoned").take();
        info!("transport closed");
    }
}

impl Inner {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "new incoming connection");
                    let peer = Arc::new(TcpPeer::new(stream, addr, Direction::Inbound));
                    let inner = Arc::clone(&self);
                    self.spawn(async move { inner.handle_inbound(peer).await });
                }
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        debug!("accept loop stopped");
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.conn_tasks.lock().expect("transport lock poisoned");
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    async fn handle_inbound(self: Arc<Self>, peer: Arc<TcpPeer>) {
        if let Err(e) = self.activate(&peer).await {
            self.drop_peer(&peer, &e.to_string()).await;
            return;
        }
        self.run_peer(peer).await;
    }

    /// Handshake, register, and announce a new peer.
    async fn activate(&self, peer: &Arc<TcpPeer>) -> TransportResult<()> {
        let mut shutdown = self.shutdown.subscribe();
        let handshake = tokio::time::timeout(
            self.opts.handshake_timeout,
            self.opts.handshake.handshake(peer),
        );
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => return Err(TransportError::Closed),
            res = handshake => res.map_err(|_| HandshakeError::Timeout)??,
        }

        self.peers.insert(Arc::clone(peer));
        debug!(peer = %peer.remote_addr(), direction = %peer.direction(), "peer registered");

        if let Some(hook) = &self.opts.on_peer {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return Err(TransportError::Closed),
                res = hook.on_peer(Arc::clone(peer)) => res?,
            }
        }
        Ok(())
    }

    async fn run_peer(self: Arc<Self>, peer: Arc<TcpPeer>) {
        let reason = match self.read_loop(&peer).await {
            Ok(()) => "connection finished".to_string(),
            Err(e) => e.to_string(),
        };
        self.drop_peer(&peer, &reason).await;
    }

    async fn drop_peer(&self, peer: &Arc<TcpPeer>, reason: &str) {
        self.peers.remove(peer);
        peer.close().await;
        info!(peer = %peer.remote_addr(), reason, "dropping peer connection");
    }

    /// Decode messages until the peer goes away, the transport shuts down,
    /// or the connection fails for good.
    async fn read_loop(&self, peer: &TcpPeer) -> TransportResult<()> {
        let tx = self
            .tx
            .lock()
            .expect("transport lock poisoned")
            .clone()
            .ok_or(TransportError::Closed)?;
        let mut shutdown = self.shutdown.subscribe();
        let mut reader = peer.reader().await;
        let from = peer.remote_addr();
        let max_errors = self.opts.max_decode_errors.max(1);
        let mut failures = 0u32;

        loop {
            let decoded = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                _ = peer.closed() => return Ok(()),
                decoded = self.opts.decoder.decode(&mut *reader) => decoded,
            };
            match decoded {
                Ok(message) => {
                    failures = 0;
                    debug!(peer = %from, kind = message.type_name(), "message decoded");
                    let envelope = Envelope { from, message };
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                        sent = tx.send(envelope) => {
                            if sent.is_err() {
                                return Err(TransportError::Closed);
                            }
                        }
                    }
                }
                Err(CodecError::Eof | CodecError::Closed) => return Ok(()),
                Err(e) if e.is_terminal() => return Err(e.into()),
                Err(e) => {
                    failures += 1;
                    warn!(peer = %from, error = %e, failures, "TCP decode error");
                    if failures >= max_errors {
                        return Err(e.into());
                    }
                }
            }
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
