//! Transport layer error types.

use std::io;

use thiserror::Error;

use super::context::ContextError;
use super::framing::FrameError;

/// Errors from [`Connection`](super::Connection) operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// I/O error outside of framing.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether retrying the operation on the same connection may succeed.
    ///
    /// Cancellation, a locally closed connection, an oversize frame and a
    /// peer that closed the stream between frames are permanent. Timeouts
    /// and other I/O failures are treated as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Context(ContextError::Cancelled) => false,
            TransportError::Context(ContextError::DeadlineExceeded) => true,
            TransportError::Closed => false,
            TransportError::Frame(FrameError::TooLarge { .. }) => false,
            TransportError::Frame(e) => !e.is_peer_closed(),
            TransportError::Io(_) => true,
        }
    }

    /// Whether the error comes from the caller's context.
    pub fn is_context(&self) -> bool {
        matches!(self, TransportError::Context(_))
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
