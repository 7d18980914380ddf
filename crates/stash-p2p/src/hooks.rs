use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PeerError;
use crate::peer::TcpPeer;

/// Called with every peer that passed its handshake, before its read loop
/// starts. Returning an error disconnects the peer.
#[async_trait]
pub trait OnPeer: Send + Sync {
    async fn on_peer(&self, peer: Arc<TcpPeer>) -> Result<(), PeerError>;
}

pub struct NoOpPeerHook;

#[async_trait]
impl OnPeer for NoOpPeerHook {
    async fn on_peer(&self, _peer: Arc<TcpPeer>) -> Result<(), PeerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Direction;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn noop_hook_accepts_every_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (stream, remote) = listener.accept().await.unwrap();
        let peer = Arc::new(TcpPeer::new(stream, remote, Direction::Inbound));

        NoOpPeerHook.on_peer(Arc::clone(&peer)).await.unwrap();
        assert!(!peer.is_closed());
    }
}
