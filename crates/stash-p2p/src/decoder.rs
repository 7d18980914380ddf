use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::CodecError;
use crate::message::{Message, MAX_FRAME_SIZE, NAIVE_BUFFER_SIZE};

/// Turns bytes from a long-lived connection into messages.
///
/// `decode` is called repeatedly on the same reader. End of stream and a
/// closed connection must surface as [`CodecError::Eof`] and
/// [`CodecError::Closed`] so the caller can stop reading.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, reader: &mut (dyn AsyncRead + Unpin + Send))
        -> Result<Message, CodecError>;
}

/// Issues one bounded read per call and hands back whatever arrived.
///
/// There is no framing: a single payload may hold part of a logical message
/// or several of them.
#[derive(Clone, Copy, Debug)]
pub struct NaiveDecoder {
    buffer_size: usize,
}

impl NaiveDecoder {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl Default for NaiveDecoder {
    fn default() -> Self {
        Self::new(NAIVE_BUFFER_SIZE)
    }
}

#[async_trait]
impl Decoder for NaiveDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Message, CodecError> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(CodecError::Eof);
        }
        buf.truncate(n);
        Ok(Message::Raw(buf))
    }
}

/// Reads length-prefixed bincode frames produced by
/// [`Message::encode_frame`].
#[derive(Clone, Copy, Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

#[async_trait]
impl Decoder for FrameDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<Message, CodecError> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_size {
            return Err(CodecError::Oversized {
                size: len,
                max: self.max_frame_size,
            });
        }
        // The buffer only grows with bytes the peer actually sent.
        let mut body = Vec::new();
        (&mut *reader).take(len as u64).read_to_end(&mut body).await?;
        if body.len() < len {
            return Err(CodecError::Eof);
        }
        bincode::deserialize(&body).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

/// Decoders selectable from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoderKind {
    Naive,
    #[default]
    Frame,
}

impl DecoderKind {
    pub fn build(self) -> Arc<dyn Decoder> {
        match self {
            Self::Naive => Arc::new(NaiveDecoder::default()),
            Self::Frame => Arc::new(FrameDecoder::default()),
        }
    }
}

impl FromStr for DecoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "naive" => Ok(Self::Naive),
            "frame" => Ok(Self::Frame),
            other => Err(format!("unknown decoder: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn naive_returns_bytes_of_one_read() {
        let data = vec![7u8; 3000];
        let mut reader: &[u8] = &data;
        let decoder = NaiveDecoder::default();

        let first = decoder.decode(&mut reader).await.unwrap();
        assert_eq!(first, Message::Raw(vec![7u8; 1024]));
        decoder.decode(&mut reader).await.unwrap();
        let third = decoder.decode(&mut reader).await.unwrap();
        assert_eq!(third, Message::Raw(vec![7u8; 3000 - 2048]));

        let err = decoder.decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Eof));
    }

    #[tokio::test]
    async fn frame_decodes_consecutive_messages() {
        let a = Message::Store { key: "hello".into(), data: b"some data".to_vec() };
        let b = Message::Delete { key: "hello".into() };
        let mut wire = a.encode_frame().unwrap();
        wire.extend(b.encode_frame().unwrap());

        let mut reader: &[u8] = &wire;
        let decoder = FrameDecoder::default();
        assert_eq!(decoder.decode(&mut reader).await.unwrap(), a);
        assert_eq!(decoder.decode(&mut reader).await.unwrap(), b);
        assert!(matches!(decoder.decode(&mut reader).await, Err(CodecError::Eof)));
    }

    #[tokio::test]
    async fn frame_truncated_body_is_eof() {
        let frame = Message::Raw(vec![1, 2, 3]).encode_frame().unwrap();
        let mut reader: &[u8] = &frame[..frame.len() - 1];
        let err = FrameDecoder::default().decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Eof));
    }

    #[tokio::test]
    async fn frame_large_header_with_short_body_is_eof() {
        let mut input = 0x03FF_FFFFu32.to_be_bytes().to_vec();
        input.extend_from_slice(b"abc");
        let mut reader: &[u8] = &input;
        let err = FrameDecoder::default().decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Eof));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn frame_rejects_oversized_header() {
        let frame = Message::Raw(vec![0; 64]).encode_frame().unwrap();
        let mut reader: &[u8] = &frame;
        let err = FrameDecoder::new(16).decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::Oversized { max: 16, .. }));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn frame_garbage_body_is_transient() {
        let mut wire = 2u32.to_be_bytes().to_vec();
        wire.extend([0xff, 0xff]);
        wire.extend(Message::Delete { key: "x".into() }.encode_frame().unwrap());

        let mut reader: &[u8] = &wire;
        let decoder = FrameDecoder::default();
        let err = decoder.decode(&mut reader).await.unwrap_err();
        assert!(!err.is_terminal());
        // The bad frame was consumed; the next one still decodes.
        assert_eq!(
            decoder.decode(&mut reader).await.unwrap(),
            Message::Delete { key: "x".into() }
        );
    }

    #[test]
    fn decoder_kind_parsing() {
        assert_eq!("naive".parse::<DecoderKind>().unwrap(), DecoderKind::Naive);
        assert_eq!("frame".parse::<DecoderKind>().unwrap(), DecoderKind::Frame);
        assert!("gob".parse::<DecoderKind>().is_err());
    }
}
