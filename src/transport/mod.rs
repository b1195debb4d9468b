//! tcpzap - Transport Layer
//!
//! This module turns a raw byte stream into a reliable message channel:
//!
//! - **Cancellation**: [`Context`] carries deadlines and cancel signals into
//!   every suspending call
//! - **Congestion control**: [`Controller`] keeps an AIMD window over
//!   outstanding messages and a smoothed RTT
//! - **Framing**: [`LengthPrefixCodec`] writes and reads `u32`-length-prefixed
//!   frames
//! - **Connections**: [`Connection`] composes the above with send retries
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Client / Server               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   context, congestion, framing, retry   │
//! ├─────────────────────────────────────────┤
//! │       TCP (or any duplex stream)        │
//! └─────────────────────────────────────────┘
//! ```

mod congestion;
mod connection;
mod context;
mod error;
mod framing;

pub use congestion::Controller;
pub use connection::*;
pub use context::*;
pub use error::*;
pub use framing::*;
