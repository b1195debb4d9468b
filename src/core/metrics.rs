//! Outcome reporting for client calls.
//!
//! A [`Tracker`] is started when a request begins and consumed when it
//! finishes, so every call reports exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a single client round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metrics {
    /// Wall time from the start of the call until its outcome was known.
    pub latency: Duration,
    /// Identifier of the remote endpoint (usually its address).
    pub target: String,
    /// Whether the call produced a response.
    pub success: bool,
}

/// Callback invoked with the outcome of each client call.
pub type Reporter = Arc<dyn Fn(Metrics) + Send + Sync>;

/// Wrap a closure as a [`Reporter`].
pub fn reporter<F>(f: F) -> Reporter
where
    F: Fn(Metrics) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Measures the latency of one operation.
pub struct Tracker {
    start: Instant,
    target: String,
    reporter: Option<Reporter>,
}

impl Tracker {
    /// Start the clock for an operation against `target`.
    pub fn start(target: impl Into<String>, reporter: Option<Reporter>) -> Self {
        Self {
            start: Instant::now(),
            target: target.into(),
            reporter,
        }
    }

    /// Time elapsed since the tracker was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Report the outcome. Without a reporter this does nothing.
    pub fn report(self, success: bool) {
        let Some(reporter) = self.reporter else {
            return;
        };
        reporter(Metrics {
            latency: self.start.elapsed(),
            target: self.target,
            success,
        });
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("start", &self.start)
            .field("target", &self.target)
            .field("reporter", &self.reporter.as_ref().map(|_| "[callback]"))
            .finish()
    }
}
