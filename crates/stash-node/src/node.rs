use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use stash_p2p::{Envelope, Message, TcpTransport, Transport};
use stash_store::Store;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// A running stash node: one transport feeding one store.
pub struct Node {
    store: Arc<Store>,
    transport: TcpTransport,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self::with_parts(
            Arc::new(Store::new(config.store)),
            TcpTransport::new(config.transport.into_opts()),
        )
    }

    pub fn with_parts(store: Arc<Store>, transport: TcpTransport) -> Self {
        Self { store, transport }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[cfg(test)]
    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    /// Start listening and spawn the consumer that applies incoming
    /// messages to the store. The consumer ends once the transport closes.
    pub async fn start(&self) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        let rx = self
            .transport
            .consume()
            .ok_or_else(|| anyhow!("transport stream already taken"))?;
        let addr = self.transport.listen_and_accept().await?;
        let consumer = tokio::spawn(consume(Arc::clone(&self.store), rx));
        info!(addr = %addr, store = ?self.store, "node started");
        Ok((addr, consumer))
    }

    /// Run until `signal` resolves, then shut the transport down and drain
    /// whatever the consumer still holds.
    pub async fn run_until<F>(self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (_, consumer) = self.start().await?;
        signal.await;
        info!("shutdown requested");
        self.transport.close().await;
        consumer.await?;
        Ok(())
    }
}

async fn consume(store: Arc<Store>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let from = envelope.from;
        if let Err(e) = apply(Arc::clone(&store), envelope).await {
            warn!(peer = %from, error = %e, "failed to apply message");
        }
    }
    debug!("consumer stopped");
}

/// Apply one message to the store. Store calls run on the blocking pool.
pub async fn apply(store: Arc<Store>, envelope: Envelope) -> anyhow::Result<()> {
    let from = envelope.from;
    match envelope.message {
        Message::Store { key, data } => {
            let (key, n) = tokio::task::spawn_blocking(move || {
                store.write_bytes(&key, &data).map(|n| (key, n))
            })
            .await??;
            info!(peer = %from, key = %key, bytes = n, "stored object");
        }
        Message::Delete { key } => {
            let key = tokio::task::spawn_blocking(move || store.delete(&key).map(|()| key)).await??;
            info!(peer = %from, key = %key, "deleted object bucket");
        }
        Message::Raw(bytes) => {
            debug!(peer = %from, bytes = bytes.len(), "received raw payload");
        }
    }
    Ok(())
}
