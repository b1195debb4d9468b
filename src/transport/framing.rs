//! Length-prefixed framing.
//!
//! Wire format, repeated per message in each direction:
//!
//! ```text
//! +------------------+-------------------+
//! | Length (4 bytes) | Payload (N bytes) |
//! | big-endian u32   |                   |
//! +------------------+-------------------+
//! ```
//!
//! No maximum is enforced unless the codec is built with
//! [`LengthPrefixCodec::with_max_frame_len`]. Without a cap, a corrupted or
//! hostile length prefix makes [`decode`](LengthPrefixCodec::decode)
//! allocate up to 4 GiB.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::constants::{LENGTH_PREFIX_SIZE, MAX_FRAME_LEN};

/// Errors while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload length does not fit the prefix or exceeds the configured cap.
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge {
        /// Offending length.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },

    /// Writing the length prefix failed.
    #[error("failed to write frame length: {0}")]
    WriteLength(#[source] io::Error),

    /// Writing the payload failed. The peer may have seen a partial frame.
    #[error("failed to write frame payload: {0}")]
    WritePayload(#[source] io::Error),

    /// Reading the length prefix failed, including a stream closed early.
    #[error("failed to read frame length: {0}")]
    ReadLength(#[source] io::Error),

    /// The stream ended before the declared payload length.
    #[error("unexpected end of data: expected {expected} payload bytes")]
    UnexpectedEof {
        /// Declared payload length.
        expected: usize,
    },

    /// Reading the payload failed for a reason other than end of stream.
    #[error("failed to read frame payload: {0}")]
    ReadPayload(#[source] io::Error),
}

impl FrameError {
    /// True when the peer closed the stream cleanly between frames.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, FrameError::ReadLength(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Stateless length-prefix codec, cheap to copy into every connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LengthPrefixCodec {
    max_frame_len: Option<u32>,
}

impl LengthPrefixCodec {
    /// A codec accepting any length the prefix can express.
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec rejecting payloads longer than `max` on both sides.
    pub fn with_max_frame_len(max: u32) -> Self {
        Self {
            max_frame_len: Some(max),
        }
    }

    /// The configured cap, if any.
    pub fn max_frame_len(&self) -> Option<u32> {
        self.max_frame_len
    }

    /// Validate a payload length and convert it to its wire value.
    pub fn check_len(&self, len: usize) -> Result<u32, FrameError> {
        let max = match self.max_frame_len {
            Some(cap) => (cap as usize).min(MAX_FRAME_LEN),
            None => MAX_FRAME_LEN,
        };
        if len > max {
            return Err(FrameError::TooLarge { len, max });
        }
        // Bounded by MAX_FRAME_LEN above.
        Ok(len as u32)
    }

    /// Write one frame. On error the frame must be considered not sent.
    pub async fn encode<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let len = self.check_len(payload.len())?;
        writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(FrameError::WriteLength)?;
        writer
            .write_all(payload)
            .await
            .map_err(FrameError::WritePayload)?;
        writer.flush().await.map_err(FrameError::WritePayload)?;
        Ok(())
    }

    /// Read exactly one frame.
    pub async fn decode<R>(&self, reader: &mut R) -> Result<Vec<u8>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; LENGTH_PREFIX_SIZE];
        reader
            .read_exact(&mut header)
            .await
            .map_err(FrameError::ReadLength)?;

        let len = u32::from_be_bytes(header) as usize;
        if let Some(cap) = self.max_frame_len {
            if len > cap as usize {
                return Err(FrameError::TooLarge {
                    len,
                    max: cap as usize,
                });
            }
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload).await {
            Ok(_) => Ok(payload),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(FrameError::UnexpectedEof { expected: len })
            }
            Err(e) => Err(FrameError::ReadPayload(e)),
        }
    }

    /// Encode one frame into a fresh buffer.
    pub fn encode_to_vec(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        let len = self.check_len(payload.len())?;
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }
}
