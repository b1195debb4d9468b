//! Core configuration, constants, errors and outcome reporting.
//!
//! Nothing in here performs I/O; the module is compiled regardless of
//! enabled features.

mod config;
pub mod constants;
mod error;
mod metrics;

pub use config::*;
pub use error::*;
pub use metrics::*;
