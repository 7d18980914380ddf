use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Largest frame body accepted by the frame codec.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Read size of the naive decoder.
pub const NAIVE_BUFFER_SIZE: usize = 1024;

/// Message carried between nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Store `data` under `key` on the receiving node.
    Store { key: String, data: Vec<u8> },
    /// Delete the bucket holding `key` on the receiving node.
    Delete { key: String },
    /// Unframed bytes, exactly as read off the connection.
    Raw(Vec<u8>),
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Store { .. } => "Store",
            Self::Delete { .. } => "Delete",
            Self::Raw(_) => "Raw",
        }
    }

    /// Encode with framing: `[4 bytes BE length][bincode body]`.
    pub fn encode_frame(&self) -> Result<Vec<u8>, CodecError> {
        let body =
            bincode::serialize(self).map_err(|e| CodecError::Serialization(e.to_string()))?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(CodecError::Oversized {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}

/// One decoded message, tagged with the address of the peer that sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: SocketAddr,
    pub message: Message,
}
