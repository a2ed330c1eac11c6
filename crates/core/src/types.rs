use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A merged top-of-book snapshot for the perp and spot legs of the pair.
///
/// Invariant: `perp_bid < perp_ask` and `spot_bid < spot_ask`. Produced by the
/// feed on every book update that changes either side; never persisted whole,
/// only sampled into `edges`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub perp_bid: Decimal,
    pub perp_ask: Decimal,
    pub spot_bid: Decimal,
    pub spot_ask: Decimal,
    pub recv_ms: i64,
    pub send_ms: Option<i64>,
}

impl Tick {
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        self.perp_bid >= self.perp_ask || self.spot_bid >= self.spot_ask
    }
}

/// Round-trip fee schedule for both venues, in basis points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub perp_taker_bps: Decimal,
    pub spot_taker_bps: Decimal,
    pub perp_maker_bps: Decimal,
    pub spot_maker_bps: Decimal,
}

impl FeeSchedule {
    /// Round-trip (open + close) taker-taker cost, the dominant-mode default
    /// the edge calculation is netted against.
    #[must_use]
    pub fn taker_roundtrip_bps(&self) -> Decimal {
        (self.perp_taker_bps + self.spot_taker_bps) * Decimal::from(2)
    }

    #[must_use]
    pub fn maker_roundtrip_bps(&self) -> Decimal {
        (self.perp_maker_bps + self.spot_maker_bps) * Decimal::from(2)
    }
}

/// Net edges (in bps of mid) and the mid reference they were computed against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Edge {
    pub edge_ps_bps: Decimal,
    pub edge_sp_bps: Decimal,
    pub mid_ref: Decimal,
    pub ts: DateTime<Utc>,
}

impl Edge {
    /// The stronger of the two directional edges and the direction it implies.
    ///
    /// Tie-break (both positive, impossible under correct fees but guarded
    /// against): prefer the larger magnitude.
    #[must_use]
    pub fn best(&self) -> (Direction, Decimal) {
        if self.edge_ps_bps.abs() >= self.edge_sp_bps.abs() {
            (Direction::PerpToSpot, self.edge_ps_bps)
        } else {
            (Direction::SpotToPerp, self.edge_sp_bps)
        }
    }
}

/// The single most load-bearing contract in this system: which side is
/// relatively expensive, and therefore which two legs to send.
///
/// `PerpToSpot`: perp expensive -> SHORT perp + BUY spot.
/// `SpotToPerp`: spot expensive -> SELL spot + LONG perp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    PerpToSpot,
    SpotToPerp,
}

impl Direction {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::PerpToSpot => Self::SpotToPerp,
            Self::SpotToPerp => Self::PerpToSpot,
        }
    }

    /// Whether the perp leg buys, for this direction, on an opening trade.
    #[must_use]
    pub const fn perp_is_buy_on_open(self) -> bool {
        match self {
            Self::PerpToSpot => false,
            Self::SpotToPerp => true,
        }
    }

    /// Whether the spot leg buys, for this direction, on an opening trade.
    #[must_use]
    pub const fn spot_is_buy_on_open(self) -> bool {
        !self.perp_is_buy_on_open()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerpToSpot => "perp_to_spot",
            Self::SpotToPerp => "spot_to_perp",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time in force for an order leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Add-liquidity-only / post-only: rejected if it would cross the spread.
    AddLiquidityOnly,
    /// Immediate-or-cancel: fills what it can immediately, cancels the rest.
    ImmediateOrCancel,
}

/// Which venue an order leg targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instrument {
    Perp,
    Spot,
}

/// A single order leg as submitted to the exchange collaborator.
///
/// Invariant: `reduce_only` is only ever set on close-side perp legs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderSpec {
    pub instrument: Instrument,
    pub is_buy: bool,
    pub size: Decimal,
    pub limit_px: Decimal,
    pub tif: TimeInForce,
    pub reduce_only: bool,
}

/// The exchange's classification of a single leg's outcome. `Unknown` means
/// the response was ambiguous (e.g. top-level success, inner
/// `status=rejected`) and must be resolved with a position query. `Resting`
/// is an acknowledgement, not a terminal state: it carries the exchange's
/// order id so the dispatcher can await a fill or issue a cancel against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LegResult {
    Filled { size_filled: Decimal, avg_px: Decimal },
    Rejected { reason: RejectReason },
    Cancelled,
    Unknown,
    Resting { order_id: String },
}

impl LegResult {
    #[must_use]
    pub const fn is_filled(&self) -> bool {
        matches!(self, Self::Filled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    PostOnlyCross,
    InsufficientMargin,
    MinNotional,
    Other,
}

/// Lifecycle state of a `HedgedPosition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
    /// One leg could not be flattened; enters manual review.
    Broken,
}

/// A live or historical delta-neutral pair of perp/spot fills.
///
/// Invariant while `Open`: `|perp_size - spot_size| <= lot_tolerance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgedPosition {
    pub id: Uuid,
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub notional_usd: Decimal,
    pub perp_size: Decimal,
    pub spot_size: Decimal,
    pub open_edge_bps: Decimal,
    pub status: PositionStatus,
    pub realized_pnl_usd: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl HedgedPosition {
    #[must_use]
    pub fn is_delta_neutral(&self, lot_tolerance: Decimal) -> bool {
        (self.perp_size - self.spot_size).abs() <= lot_tolerance
    }
}

/// Fixed-capacity FIFO of the last N ticks, used by the `OpportunityTracker`
/// to compute per-side deviations. Returns `None` until it has seen N ticks.
#[derive(Debug, Clone)]
pub struct RollingBaseline {
    capacity: usize,
    ticks: std::collections::VecDeque<Tick>,
}

impl RollingBaseline {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ticks: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ticks.len() == self.capacity
    }

    /// Per-side arithmetic means over the window, or `None` until full.
    #[must_use]
    pub fn means(&self) -> Option<BaselineMeans> {
        if !self.is_full() {
            return None;
        }
        let n = Decimal::from(self.ticks.len());
        let mut perp_bid = Decimal::ZERO;
        let mut perp_ask = Decimal::ZERO;
        let mut spot_bid = Decimal::ZERO;
        let mut spot_ask = Decimal::ZERO;
        for t in &self.ticks {
            perp_bid += t.perp_bid;
            perp_ask += t.perp_ask;
            spot_bid += t.spot_bid;
            spot_ask += t.spot_ask;
        }
        Some(BaselineMeans {
            perp_bid: perp_bid / n,
            perp_ask: perp_ask / n,
            spot_bid: spot_bid / n,
            spot_ask: spot_ask / n,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BaselineMeans {
    pub perp_bid: Decimal,
    pub perp_ask: Decimal,
    pub spot_bid: Decimal,
    pub spot_ask: Decimal,
}

/// Classification of which side moved to create the current dislocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilitySource {
    Perp,
    Spot,
    Both,
}

/// A read-only record of an above-observation-threshold edge, purely
/// observational; the tracker that produces these never triggers a trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub detected_at: DateTime<Utc>,
    pub tick: Tick,
    pub baseline: BaselineSnapshot,
    pub perp_deviation_bps: Decimal,
    pub spot_deviation_bps: Decimal,
    pub perp_movement_bps: Decimal,
    pub spot_movement_bps: Decimal,
    pub source: VolatilitySource,
    pub ratio: Decimal,
    pub simulated: SimulatedCosts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub perp_bid_mean: Decimal,
    pub perp_ask_mean: Decimal,
    pub spot_bid_mean: Decimal,
    pub spot_ask_mean: Decimal,
}

impl From<BaselineMeans> for BaselineSnapshot {
    fn from(m: BaselineMeans) -> Self {
        Self {
            perp_bid_mean: m.perp_bid,
            perp_ask_mean: m.perp_ask,
            spot_bid_mean: m.spot_bid,
            spot_ask_mean: m.spot_ask,
        }
    }
}

/// Simulated net profit (bps) for each of the three execution modes the
/// tracker evaluates, purely for calibration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulatedCosts {
    pub ioc_both_bps: Decimal,
    pub ioc_perp_maker_spot_bps: Decimal,
    pub maker_both_bps: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direction_opposite_round_trips() {
        assert_eq!(Direction::PerpToSpot.opposite(), Direction::SpotToPerp);
        assert_eq!(Direction::SpotToPerp.opposite(), Direction::PerpToSpot);
    }

    #[test]
    fn perp_to_spot_sells_perp_buys_spot() {
        let d = Direction::PerpToSpot;
        assert!(!d.perp_is_buy_on_open());
        assert!(d.spot_is_buy_on_open());
    }

    #[test]
    fn spot_to_perp_buys_perp_sells_spot() {
        let d = Direction::SpotToPerp;
        assert!(d.perp_is_buy_on_open());
        assert!(!d.spot_is_buy_on_open());
    }

    #[test]
    fn edge_best_picks_larger_magnitude() {
        let e = Edge {
            edge_ps_bps: dec!(20),
            edge_sp_bps: dec!(-3),
            mid_ref: dec!(50),
            ts: Utc::now(),
        };
        let (dir, bps) = e.best();
        assert_eq!(dir, Direction::PerpToSpot);
        assert_eq!(bps, dec!(20));
    }

    #[test]
    fn edge_best_handles_spot_dominant() {
        let e = Edge {
            edge_ps_bps: dec!(-3),
            edge_sp_bps: dec!(18),
            mid_ref: dec!(50),
            ts: Utc::now(),
        };
        let (dir, bps) = e.best();
        assert_eq!(dir, Direction::SpotToPerp);
        assert_eq!(bps, dec!(18));
    }

    #[test]
    fn rolling_baseline_none_until_full() {
        let mut b = RollingBaseline::new(3);
        let tick = Tick {
            perp_bid: dec!(100),
            perp_ask: dec!(100.1),
            spot_bid: dec!(99.9),
            spot_ask: dec!(100.0),
            recv_ms: 0,
            send_ms: None,
        };
        b.push(tick);
        b.push(tick);
        assert!(b.means().is_none());
        b.push(tick);
        assert!(b.means().is_some());
    }

    #[test]
    fn rolling_baseline_evicts_oldest() {
        let mut b = RollingBaseline::new(2);
        let mk = |px: Decimal| Tick {
            perp_bid: px,
            perp_ask: px + dec!(0.1),
            spot_bid: px,
            spot_ask: px + dec!(0.1),
            recv_ms: 0,
            send_ms: None,
        };
        b.push(mk(dec!(100)));
        b.push(mk(dec!(102)));
        b.push(mk(dec!(104)));
        let means = b.means().unwrap();
        assert_eq!(means.perp_bid, dec!(103));
    }

    #[test]
    fn tick_detects_crossed_book() {
        let t = Tick {
            perp_bid: dec!(101),
            perp_ask: dec!(100),
            spot_bid: dec!(99),
            spot_ask: dec!(100),
            recv_ms: 0,
            send_ms: None,
        };
        assert!(t.is_crossed());
    }

    #[test]
    fn fee_schedule_roundtrip_doubles_open_close() {
        let f = FeeSchedule {
            perp_taker_bps: dec!(2.5),
            spot_taker_bps: dec!(3.5),
            perp_maker_bps: dec!(0),
            spot_maker_bps: dec!(0),
        };
        assert_eq!(f.taker_roundtrip_bps(), dec!(12));
    }
}
