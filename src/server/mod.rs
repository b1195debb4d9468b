//! tcpzap - Server Library
//!
//! Accepts TCP connections and answers each framed request with the output
//! of a [`Handler`].

mod handler;
#[allow(clippy::module_inception)]
mod server;

pub use handler::*;
pub use server::*;
