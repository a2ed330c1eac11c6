use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use basis_core::{Direction, Edge};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Sliding 60-second window counter over dispatch attempts. Consulted by the
/// gate before arming; the gate itself never resets it.
#[derive(Debug, Default)]
pub struct RateLimiter {
    window: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(60);
        while matches!(window.front(), Some(ts) if *ts < cutoff) {
            window.pop_front();
        }
    }

    #[must_use]
    pub fn count_in_window(&self, now: DateTime<Utc>) -> u32 {
        let mut window = self.window.lock();
        Self::prune(&mut window, now);
        u32::try_from(window.len()).unwrap_or(u32::MAX)
    }

    pub fn record(&self, now: DateTime<Utc>) {
        let mut window = self.window.lock();
        Self::prune(&mut window, now);
        window.push_back(now);
    }
}

/// `Idle -> Armed -> Firing -> CoolDown -> Idle`. See spec §4.3.
#[derive(Debug, Clone, PartialEq)]
enum GateState {
    Idle,
    Armed {
        armed_at: DateTime<Utc>,
        direction: Direction,
    },
    Firing,
    CoolDown {
        started_at: DateTime<Utc>,
    },
}

/// A request handed to the `OrderDispatcher` when the gate fires. Exactly one
/// is emitted per `Armed` episode.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest {
    pub direction: Direction,
    pub edge_bps: rust_decimal::Decimal,
}

/// Filters the edge stream: only lets a dispatch request through when the
/// stronger edge has stayed above `threshold_bps` for `dwell_ms`
/// continuously, no rate-limit guard is active, and the gate is not paused.
pub struct StabilityGate {
    threshold_bps: Mutex<rust_decimal::Decimal>,
    dwell_ms: i64,
    cool_down_ms: i64,
    max_trades_per_min: u32,
    state: Mutex<GateState>,
    paused: Arc<AtomicBool>,
    feed_stale: Arc<AtomicBool>,
    rate_limiter: Arc<RateLimiter>,
}

impl StabilityGate {
    #[must_use]
    pub fn new(
        threshold_bps: rust_decimal::Decimal,
        dwell_ms: i64,
        cool_down_ms: i64,
        max_trades_per_min: u32,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            threshold_bps: Mutex::new(threshold_bps),
            dwell_ms,
            cool_down_ms,
            max_trades_per_min,
            state: Mutex::new(GateState::Idle),
            paused: Arc::new(AtomicBool::new(false)),
            feed_stale: Arc::new(AtomicBool::new(false)),
            rate_limiter,
        }
    }

    #[must_use]
    pub fn paused_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    #[must_use]
    pub fn feed_stale_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.feed_stale)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_feed_stale(&self, stale: bool) {
        self.feed_stale.store(stale, Ordering::SeqCst);
    }

    /// Updates the arming threshold, per the control surface's
    /// `set threshold <bps>` command. Takes effect on the next tick; does
    /// not retroactively affect an episode already `Armed`.
    pub fn set_threshold_bps(&self, threshold_bps: rust_decimal::Decimal) {
        *self.threshold_bps.lock() = threshold_bps;
    }

    #[must_use]
    pub fn threshold_bps(&self) -> rust_decimal::Decimal {
        *self.threshold_bps.lock()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(*self.state.lock(), GateState::Idle)
    }

    /// Feeds one edge through the gate's state machine. Returns
    /// `Some(DispatchRequest)` exactly once per `Armed` episode, the instant
    /// the dwell window completes.
    pub fn on_edge(&self, edge: &Edge, now: DateTime<Utc>) -> Option<DispatchRequest> {
        if self.paused.load(Ordering::SeqCst) || self.feed_stale.load(Ordering::SeqCst) {
            *self.state.lock() = GateState::Idle;
            return None;
        }

        let (direction, bps) = edge.best();
        let above_threshold = bps >= self.threshold_bps();

        let mut state = self.state.lock();
        match &*state {
            GateState::Idle => {
                if above_threshold {
                    if self.rate_limiter.count_in_window(now) >= self.max_trades_per_min {
                        return None;
                    }
                    *state = GateState::Armed {
                        armed_at: now,
                        direction,
                    };
                }
                None
            }
            GateState::Armed {
                armed_at,
                direction: armed_direction,
            } => {
                if !above_threshold || direction != *armed_direction {
                    *state = GateState::Idle;
                    return None;
                }
                if (now - *armed_at) >= Duration::milliseconds(self.dwell_ms) {
                    *state = GateState::Firing;
                    self.rate_limiter.record(now);
                    return Some(DispatchRequest {
                        direction,
                        edge_bps: bps,
                    });
                }
                None
            }
            GateState::Firing => {
                // Dispatcher is in flight; the request was already emitted
                // once. Transition to CoolDown defensively in case the
                // caller forgot to call `on_dispatch_started`.
                *state = GateState::CoolDown { started_at: now };
                None
            }
            GateState::CoolDown { started_at } => {
                if (now - *started_at) >= Duration::milliseconds(self.cool_down_ms) {
                    *state = GateState::Idle;
                }
                None
            }
        }
    }

    /// Call immediately after `on_edge` returns `Some` to move the gate into
    /// `CoolDown` for the duration of the dispatch.
    pub fn on_dispatch_started(&self, now: DateTime<Utc>) {
        *self.state.lock() = GateState::CoolDown { started_at: now };
    }

    /// The dispatcher reports a terminal status (fill, rejection, or broken
    /// hedge): the gate may leave `CoolDown` immediately rather than waiting
    /// out `cool_down_ms`.
    pub fn on_dispatch_terminal(&self) {
        *self.state.lock() = GateState::Idle;
    }
}
