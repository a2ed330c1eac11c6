use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Direction, HedgedPosition};

/// Payload broadcast to any connected read-only observer on every edge
/// computation, per the control surface's broadcast feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeBroadcast {
    pub ts: DateTime<Utc>,
    pub base: String,
    pub spot_index: String,
    pub edge_ps_mm_bps: Decimal,
    pub edge_sp_mm_bps: Decimal,
    pub mid_ref: Decimal,
    pub latency_ms: i64,
    pub threshold_bps: Decimal,
}

/// Events fanned out on the control surface's broadcast channel: the live
/// edge feed plus terminal-outcome notifications that stand in for the
/// out-of-scope operator messaging bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BotEvent {
    Edge(EdgeBroadcast),
    Notification(Notification),
    PositionOpened(HedgedPosition),
    PositionClosed(HedgedPosition),
}

/// Every terminal dispatch/position outcome produces exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub ts: DateTime<Utc>,
    pub severity: Severity,
    pub position_id: Option<Uuid>,
    pub direction: Option<Direction>,
    pub notional_usd: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    pub message: String,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}
