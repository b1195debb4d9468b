//! # tcpzap
//!
//! Congestion-aware message transport over TCP.
//!
//! tcpzap turns a TCP stream into a channel of discrete messages and adds
//! the flow control and failure handling a request/response service needs:
//!
//! - **Framing**: every message is a 4-byte big-endian length followed by
//!   the payload
//! - **Congestion control**: each connection keeps an AIMD window over
//!   messages in flight, driven by a smoothed round-trip time
//! - **Retries**: sends are retried on write failures and the client
//!   resends requests whose response did not arrive
//! - **Cancellation**: every suspending call takes a [`Context`] carrying a
//!   deadline and a cancel signal
//!
//! ## Feature Flags
//!
//! - `transport` (default): framing, congestion control and connections
//! - `client` (default): [`Client`](client::Client)
//! - `server` (default): [`Server`](server::Server) and [`Handler`](server::Handler)
//!
//! ## Modules
//!
//! - [`core`]: configuration, constants, errors and outcome reporting
//!   (always included)
//! - [`transport`]: transport layer (requires `transport` feature)
//! - [`client`]: client API (requires `client` feature)
//! - [`server`]: server API (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tcpzap::prelude::*;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     async fn handle(&self, _ctx: &Context, msg: Vec<u8>) -> Result<Vec<u8>, BoxError> {
//!         let mut resp = b"Echo: ".to_vec();
//!         resp.extend_from_slice(&msg);
//!         Ok(resp)
//!     }
//! }
//!
//! # async fn run() -> Result<(), ZapError> {
//! let server = std::sync::Arc::new(Server::bind("127.0.0.1:0", Config::default()).await?);
//! let addr = server.local_addr().to_string();
//!
//! let background = server.clone();
//! tokio::spawn(async move { background.serve(&Context::background(), Echo).await });
//!
//! let client = Client::connect(&addr, Config::default()).await?;
//! let resp = client.send(&Context::background(), b"Hello").await?;
//! assert_eq!(resp, b"Echo: Hello");
//!
//! server.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Context`]: transport::Context

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        BoxError, CongestionConfig, Config, ConfigError, Metrics, Reporter, ZapError, reporter,
    };

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        CancelHandle, Connection, Context, ContextError, LengthPrefixCodec, TransportError,
        TransportResult,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{Client, ClientError};

    #[cfg(feature = "server")]
    pub use crate::server::{Handler, Server, ServerError, handler_fn};
}

// Re-export commonly used items at crate root
pub use core::{BoxError, Config, ZapError};

#[cfg(feature = "transport")]
pub use transport::{Connection, Context, LengthPrefixCodec, TransportError};
