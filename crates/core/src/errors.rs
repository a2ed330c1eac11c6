use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Direction;

/// Errors surfaced by the `OrderDispatcher`. Variants map 1:1 onto the
/// propagation policy: `PartialRecovered` is a successful outcome with a
/// warning, `BrokenHedge` is fatal to the position but not the process.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("neither leg filled")]
    NoFill,

    #[error("partial fill recovered by flattening the filled leg: {direction} notional {notional_usd}")]
    PartialRecovered {
        direction: Direction,
        notional_usd: Decimal,
    },

    #[error("broken hedge: {direction} leg left unhedged, size {exposure_size}, flatten failed: {flatten_error}")]
    BrokenHedge {
        direction: Direction,
        exposure_size: Decimal,
        flatten_error: String,
    },

    #[error("capital guard refused dispatch: {0}")]
    CapitalRefused(#[from] CapitalError),

    #[error("rate limited: {count} dispatches in the last 60s (max {max})")]
    RateLimited { count: u32, max: u32 },

    #[error("gate paused")]
    Paused,

    #[error("order rejected (post-only cross)")]
    OrderRejectedPostOnly,

    #[error("order rejected: {0}")]
    OrderRejectedOther(String),

    #[error("order acknowledgement timed out")]
    Timeout,

    #[error("exchange error: {0}")]
    ExchangeError(String),

    #[error("persistence error (degraded, non-fatal): {0}")]
    PersistenceError(String),
}

/// Reasons a `CapitalGuard` can refuse a dispatch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CapitalError {
    #[error("insufficient perp free margin: have {have}, need {need}")]
    InsufficientPerpMargin { have: Decimal, need: Decimal },

    #[error("insufficient spot USDC: have {have}, need {need}")]
    InsufficientSpotUsdc { have: Decimal, need: Decimal },

    #[error("insufficient spot base asset: have {have}, need {need}")]
    InsufficientSpotBase { have: Decimal, need: Decimal },

    #[error("balance query failed: {0}")]
    QueryFailed(String),
}

/// Errors surfaced by the `MarketFeed`.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed stale: no update for {gap_ms}ms (threshold {threshold_ms}ms)")]
    FeedStale { gap_ms: i64, threshold_ms: i64 },

    #[error("book crossed on {side}")]
    BookCrossed { side: &'static str },

    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Non-fatal: persistence failures degrade to best-effort logging and never
/// block the trading path.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("write failed: {0}")]
    Write(String),

    #[error("query failed: {0}")]
    Query(String),
}
