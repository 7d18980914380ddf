use std::io;

/// Errors from encoding or decoding messages on a connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The remote end finished sending.
    #[error("end of stream")]
    Eof,

    /// The connection was reset or closed underneath the reader.
    #[error("connection closed")]
    Closed,

    /// A frame header announced more bytes than allowed.
    #[error("frame too large: {size} bytes (max {max})")]
    Oversized { size: usize, max: usize },

    /// The frame body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl CodecError {
    /// Terminal errors end the read loop of a connection; everything else is
    /// reported and reading continues.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Eof | Self::Closed | Self::Oversized { .. })
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::Eof,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

/// Errors raised by a peer connection or a peer-accepted hook.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer connection is closed")]
    Closed,

    #[error("peer rejected: {0}")]
    Rejected(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the connection handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("handshake timed out")]
    Timeout,

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the transport itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transport is already listening")]
    AlreadyListening,

    #[error("transport is closed")]
    Closed,

    #[error("failed to dial {addr}: {source}")]
    Dial { addr: String, source: io::Error },

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("decode error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
