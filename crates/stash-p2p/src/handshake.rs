use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::error::HandshakeError;
use crate::peer::TcpPeer;

/// Validates a new connection before it becomes an active peer.
///
/// Runs exactly once per accepted or dialed connection. An error closes the
/// connection; the peer is never registered or handed to the peer hook.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn handshake(&self, peer: &TcpPeer) -> Result<(), HandshakeError>;
}

/// Accepts every connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn handshake(&self, _peer: &TcpPeer) -> Result<(), HandshakeError> {
        Ok(())
    }
}

/// Both sides send a fixed 4-byte tag and check the one they receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MagicHandshake {
    magic: [u8; 4],
}

impl MagicHandshake {
    pub const DEFAULT_MAGIC: [u8; 4] = *b"STSH";

    pub fn new(magic: [u8; 4]) -> Self {
        Self { magic }
    }
}

impl Default for MagicHandshake {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAGIC)
    }
}

#[async_trait]
impl Handshake for MagicHandshake {
    async fn handshake(&self, peer: &TcpPeer) -> Result<(), HandshakeError> {
        peer.send(&self.magic).await?;
        let mut remote = [0u8; 4];
        peer.reader().await.read_exact(&mut remote).await?;
        if remote != self.magic {
            return Err(HandshakeError::Rejected(format!(
                "unexpected magic {} from {}",
                hex::encode(remote),
                peer.remote_addr()
            )));
        }
        Ok(())
    }
}

/// Handshakes selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandshakeKind {
    #[default]
    Nop,
    Magic,
}

impl HandshakeKind {
    pub fn build(self) -> Arc<dyn Handshake> {
        match self {
            Self::Nop => Arc::new(NopHandshake),
            Self::Magic => Arc::new(MagicHandshake::default()),
        }
    }
}

impl FromStr for HandshakeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nop" => Ok(Self::Nop),
            "magic" => Ok(Self::Magic),
            other => Err(format!("unknown handshake: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Direction;
    use tokio::net::{TcpListener, TcpStream};

    async fn peer_pair() -> (TcpPeer, TcpPeer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, remote) = listener.accept().await.unwrap();
        (
            TcpPeer::new(server, remote, Direction::Inbound),
            TcpPeer::new(client, addr, Direction::Outbound),
        )
    }

    #[tokio::test]
    async fn nop_always_succeeds() {
        let (a, _b) = peer_pair().await;
        NopHandshake.handshake(&a).await.unwrap();
    }

    #[tokio::test]
    async fn magic_matches() {
        let (a, b) = peer_pair().await;
        let hs = MagicHandshake::default();
        let (ra, rb) = tokio::join!(hs.handshake(&a), hs.handshake(&b));
        ra.unwrap();
        rb.unwrap();
    }

    #[tokio::test]
    async fn magic_mismatch_rejected() {
        let (a, b) = peer_pair().await;
        let ours = MagicHandshake::default();
        let theirs = MagicHandshake::new(*b"XXXX");
        let (ra, rb) = tokio::join!(ours.handshake(&a), theirs.handshake(&b));
        assert!(matches!(ra, Err(HandshakeError::Rejected(_))));
        assert!(matches!(rb, Err(HandshakeError::Rejected(_))));
    }
}
