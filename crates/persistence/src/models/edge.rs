//! Edge sample records — high-volume, batch-written.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One row of `edges`: a single tick's computed edges, sampled for
/// calibration and audit. `spot_index` is the exchange-assigned spot
/// instrument index (Hyperliquid has no string spot symbol on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EdgeRecord {
    pub ts: DateTime<Utc>,
    pub base: String,
    pub spot_index: i32,
    pub edge_ps_mm_bps: Decimal,
    pub edge_sp_mm_bps: Decimal,
    pub mid_ref: Decimal,
    pub recv_ms: i64,
    pub send_ms: Option<i64>,
}

impl EdgeRecord {
    #[must_use]
    pub fn from_edge(base: &str, spot_index: i32, edge: &basis_core::Edge, recv_ms: i64, send_ms: Option<i64>) -> Self {
        Self {
            ts: edge.ts,
            base: base.to_string(),
            spot_index,
            edge_ps_mm_bps: edge.edge_ps_bps,
            edge_sp_mm_bps: edge.edge_sp_bps,
            mid_ref: edge.mid_ref,
            recv_ms,
            send_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn from_edge_copies_fields() {
        let edge = basis_core::Edge {
            edge_ps_bps: dec!(5),
            edge_sp_bps: dec!(-8),
            mid_ref: dec!(100),
            ts: Utc::now(),
        };
        let record = EdgeRecord::from_edge("BTC", 0, &edge, 123, Some(120));
        assert_eq!(record.base, "BTC");
        assert_eq!(record.edge_ps_mm_bps, dec!(5));
        assert_eq!(record.recv_ms, 123);
    }
}
