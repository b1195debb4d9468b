//! Protocol constants and configuration defaults.
//!
//! Wire-format values are fixed and MUST NOT be changed; the defaults can be
//! overridden through [`Config`](super::Config).

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Size of the big-endian `u32` length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a frame can carry.
///
/// Payloads of `u32::MAX` bytes or more are rejected at encode time.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize - 1;

// =============================================================================
// CONNECTION DEFAULTS
// =============================================================================

/// Dial and per-receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Additional attempts after the first one.
pub const DEFAULT_RETRIES: u32 = 3;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// CONGESTION WINDOW DEFAULTS
// =============================================================================

/// Messages allowed in flight on a fresh connection.
pub const DEFAULT_INITIAL_WINDOW: usize = 10;

/// Floor for multiplicative decrease.
pub const DEFAULT_MIN_WINDOW: usize = 1;

/// Ceiling for additive increase.
pub const DEFAULT_MAX_WINDOW: usize = 100;

/// EWMA weight of a new RTT sample (TCP-style 1/8).
pub const DEFAULT_RTT_FACTOR: f64 = 0.125;

/// Window multiplier applied on congestion (halve).
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.5;

/// Smoothed RTT before the first acknowledgment.
pub const INITIAL_RTT: Duration = Duration::from_millis(100);

/// Lower bound for the `RTT / 10` poll while the window is exhausted.
pub const MIN_BACKOFF_POLL: Duration = Duration::from_millis(1);
