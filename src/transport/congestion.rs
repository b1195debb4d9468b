//! AIMD congestion window over message counts.
//!
//! A simplified TCP analogue: each permitted send takes a slot in the window,
//! each received message frees one and feeds an RTT sample into an
//! exponential moving average. A send that finds the window full marks the
//! connection congested; the next acknowledgment then shrinks the window
//! multiplicatively. Otherwise the window grows by one while less than half
//! of it is in use.
//!
//! RTT samples are measured against the most recent permitted send, not the
//! send being acknowledged. With several messages in flight the sample is an
//! approximation; window dynamics depend on it, so it stays that way.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use super::context::Context;
use crate::core::CongestionConfig;
use crate::core::constants::INITIAL_RTT;

#[derive(Debug)]
struct ControllerState {
    window: usize,
    unacked: usize,
    smoothed_rtt: Duration,
    last_sent: Instant,
    congested: bool,
}

impl ControllerState {
    fn adjust_window(&mut self, cfg: &CongestionConfig) {
        if self.congested {
            let shrunk = (self.window as f64 * cfg.backoff_factor).floor() as usize;
            self.window = shrunk.max(cfg.min_window);
            self.congested = false;
        } else if self.unacked < self.window / 2 && self.window < cfg.max_window {
            self.window += 1;
        }
    }
}

/// Per-connection congestion controller.
///
/// All methods take `&self`; the state sits behind one mutex that is never
/// held across an await point.
#[derive(Debug)]
pub struct Controller {
    cfg: CongestionConfig,
    state: Mutex<ControllerState>,
}

impl Controller {
    /// Create a controller with the window at `cfg.initial_window`.
    pub fn new(cfg: CongestionConfig) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                window: cfg.initial_window,
                unacked: 0,
                smoothed_rtt: INITIAL_RTT,
                last_sent: Instant::now(),
                congested: false,
            }),
            cfg,
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to take a slot in the window.
    ///
    /// Returns `false` and marks the controller congested when the window is
    /// full. Returns `false` without side effects when `ctx` is already done.
    pub fn can_send(&self, ctx: &Context) -> bool {
        let mut state = self.state();
        if state.unacked >= state.window {
            state.congested = true;
            trace!(window = state.window, unacked = state.unacked, "window exhausted");
            return false;
        }
        if ctx.is_done() {
            return false;
        }
        state.unacked += 1;
        state.last_sent = Instant::now();
        true
    }

    /// Record an acknowledgment: free a slot, sample RTT, adjust the window.
    ///
    /// Ignored when nothing is outstanding.
    pub fn ack_received(&self) {
        let mut state = self.state();
        if state.unacked == 0 {
            return;
        }
        state.unacked -= 1;

        let sample = state.last_sent.elapsed();
        let factor = self.cfg.rtt_factor;
        state.smoothed_rtt = state.smoothed_rtt.mul_f64(1.0 - factor) + sample.mul_f64(factor);

        let before = state.window;
        state.adjust_window(&self.cfg);
        if state.window != before {
            trace!(from = before, to = state.window, "window adjusted");
        }
    }

    /// Current window size.
    pub fn window(&self) -> usize {
        self.state().window
    }

    /// Current smoothed round-trip time.
    pub fn rtt(&self) -> Duration {
        self.state().smoothed_rtt
    }

    /// Sends permitted but not yet acknowledged.
    pub fn unacked(&self) -> usize {
        self.state().unacked
    }

    /// Whether a denied send is waiting to shrink the window.
    pub fn is_congested(&self) -> bool {
        self.state().congested
    }

    /// The configuration this controller runs with.
    pub fn config(&self) -> &CongestionConfig {
        &self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ctrl: &Controller, ctx: &Context, n: usize) {
        for i in 0..n {
            assert!(ctrl.can_send(ctx), "can_send failed at {}", i);
        }
    }

    #[test]
    fn test_exhaustion_after_initial_window() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        fill(&ctrl, &ctx, cfg.initial_window);
        assert!(!ctrl.can_send(&ctx));
        assert!(ctrl.is_congested());
        assert_eq!(ctrl.unacked(), cfg.initial_window);
    }

    #[test]
    fn test_backoff_after_denied_send() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        fill(&ctrl, &ctx, cfg.initial_window);
        assert!(!ctrl.can_send(&ctx));

        let prior = ctrl.window();
        ctrl.ack_received();
        assert_eq!(ctrl.window(), (prior as f64 * cfg.backoff_factor).floor() as usize);
        assert!(!ctrl.is_congested());
    }

    #[test]
    fn test_backoff_respects_min_window() {
        let cfg = CongestionConfig {
            initial_window: 3,
            min_window: 2,
            max_window: 10,
            backoff_factor: 0.1,
            ..CongestionConfig::default()
        };
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        fill(&ctrl, &ctx, 3);
        assert!(!ctrl.can_send(&ctx));
        ctrl.ack_received();
        assert_eq!(ctrl.window(), 2);
    }

    #[test]
    fn test_additive_increase() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        // One in flight, well under half the window.
        assert!(ctrl.can_send(&ctx));
        ctrl.ack_received();
        assert_eq!(ctrl.window(), cfg.initial_window + 1);
    }

    #[test]
    fn test_no_increase_past_half_window() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        // 10 in flight; after one ack 9 remain, not below 10 / 2.
        fill(&ctrl, &ctx, 10);
        ctrl.ack_received();
        assert_eq!(ctrl.window(), 10);
    }

    #[test]
    fn test_increase_capped_at_max_window() {
        let cfg = CongestionConfig {
            initial_window: 4,
            min_window: 1,
            max_window: 4,
            ..CongestionConfig::default()
        };
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        for _ in 0..5 {
            assert!(ctrl.can_send(&ctx));
            ctrl.ack_received();
        }
        assert_eq!(ctrl.window(), 4);
    }

    #[test]
    fn test_ack_without_outstanding_is_ignored() {
        let ctrl = Controller::new(CongestionConfig::default());
        let rtt = ctrl.rtt();
        ctrl.ack_received();
        assert_eq!(ctrl.unacked(), 0);
        assert_eq!(ctrl.window(), 10);
        assert_eq!(ctrl.rtt(), rtt);
    }

    #[test]
    fn test_cancelled_context_denies_without_mutation() {
        let ctrl = Controller::new(CongestionConfig::default());
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();

        assert!(!ctrl.can_send(&ctx));
        assert_eq!(ctrl.unacked(), 0);
        assert!(!ctrl.is_congested());
    }

    #[test]
    fn test_rtt_moves_toward_sample() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        assert_eq!(ctrl.rtt(), INITIAL_RTT);
        assert!(ctrl.can_send(&ctx));
        // Immediate ack: the sample is close to zero, pulling the average down.
        ctrl.ack_received();
        let rtt = ctrl.rtt();
        assert!(rtt < INITIAL_RTT);
        assert!(rtt >= INITIAL_RTT.mul_f64(1.0 - cfg.rtt_factor));
    }

    #[test]
    fn test_window_recovers_after_congestion() {
        let cfg = CongestionConfig::default();
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        fill(&ctrl, &ctx, cfg.initial_window);
        assert!(!ctrl.can_send(&ctx));

        // Halved to 5 on the first ack; sending resumes once fewer than 5
        // remain outstanding.
        for _ in 0..6 {
            ctrl.ack_received();
        }
        assert_eq!(ctrl.window(), 5);
        assert!(ctrl.can_send(&ctx));
    }

    #[test]
    fn test_window_stays_in_bounds() {
        let cfg = CongestionConfig {
            initial_window: 5,
            min_window: 2,
            max_window: 8,
            rtt_factor: 0.5,
            backoff_factor: 0.5,
        };
        let ctrl = Controller::new(cfg);
        let ctx = Context::background();

        // Deterministic mix of bursts and drains.
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 == 0 {
                ctrl.ack_received();
            } else {
                ctrl.can_send(&ctx);
            }
            let window = ctrl.window();
            assert!((cfg.min_window..=cfg.max_window).contains(&window));
        }
    }
}
