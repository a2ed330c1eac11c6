//! Hedged-position lifecycle records.

use basis_core::HedgedPosition;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of `positions`, upserted on every lifecycle transition
/// (`Open -> Closing -> Closed`/`Broken`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PositionRecord {
    pub id: Uuid,
    pub direction: String,
    pub opened_at: DateTime<Utc>,
    pub notional_usd: Decimal,
    pub perp_size: Decimal,
    pub spot_size: Decimal,
    pub open_edge_bps: Decimal,
    pub status: String,
    pub realized_pnl_usd: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&HedgedPosition> for PositionRecord {
    fn from(p: &HedgedPosition) -> Self {
        Self {
            id: p.id,
            direction: p.direction.as_str().to_string(),
            opened_at: p.opened_at,
            notional_usd: p.notional_usd,
            perp_size: p.perp_size,
            spot_size: p.spot_size,
            open_edge_bps: p.open_edge_bps,
            status: format!("{:?}", p.status).to_lowercase(),
            realized_pnl_usd: p.realized_pnl_usd,
            closed_at: p.closed_at,
        }
    }
}
