//! Peer transport for stash nodes.
//!
//! A [`TcpTransport`] listens for connections, runs a pluggable
//! [`Handshake`] on each one, then decodes messages with a pluggable
//! [`Decoder`] and funnels them, tagged with the sender's address, into a
//! single [`Envelope`] stream for the node to consume.
//!
//! Messages from one peer arrive in the order they were read; messages from
//! different peers interleave freely.

pub mod decoder;
pub mod error;
pub mod handshake;
pub mod hooks;
pub mod message;
pub mod peer;
pub mod transport;

pub use decoder::{Decoder, DecoderKind, FrameDecoder, NaiveDecoder};
pub use error::{CodecError, HandshakeError, PeerError, TransportError, TransportResult};
pub use handshake::{Handshake, HandshakeKind, MagicHandshake, NopHandshake};
pub use hooks::{NoOpPeerHook, OnPeer};
pub use message::{Envelope, Message, MAX_FRAME_SIZE, NAIVE_BUFFER_SIZE};
pub use peer::{Direction, PeerRegistry, TcpPeer};
pub use transport::{
    normalize_listen_addr, TcpTransport, TcpTransportConfig, TcpTransportOpts, Transport,
};
