//! tcpzap - Client Library
//!
//! Dial a server and exchange framed request/response pairs with retries
//! and outcome reporting.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
