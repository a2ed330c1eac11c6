//! Trade repository: synchronous writes. §6 requires `trades` and
//! position lifecycle events to land before the dispatch call returns,
//! so the operator's view of "a trade happened" can never outrun disk.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TradeRecord;

#[derive(Debug, Clone)]
pub struct TradeRepository {
    pool: PgPool,
}

impl TradeRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the insert fails. Callers treat this as
    /// `PersistenceError` and degrade to logging rather than blocking
    /// the trading path further.
    pub async fn insert(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trades
                (id, ts, base, direction, threshold_bps, mm_best_bps, notional_usd,
                 role, request_id, request_json, response_json, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(record.id)
        .bind(record.ts)
        .bind(&record.base)
        .bind(&record.direction)
        .bind(record.threshold_bps)
        .bind(record.mm_best_bps)
        .bind(record.notional_usd)
        .bind(&record.role)
        .bind(record.request_id)
        .bind(&record.request_json)
        .bind(&record.response_json)
        .bind(&record.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent trades for the `trades [hours]` control-surface command.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn recent(&self, base: &str, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(
            r"
            SELECT id, ts, base, direction, threshold_bps, mm_best_bps, notional_usd,
                   role, request_id, request_json, response_json, status
            FROM trades
            WHERE base = $1 AND ts >= $2
            ORDER BY ts DESC
            ",
        )
        .bind(base)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Sum of realised P&L attributable to closing trades, for the
    /// `pnl [hours]` command. Returns zero when no rows match.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn realized_pnl_since(&self, base: &str, since: DateTime<Utc>) -> Result<Decimal> {
        let row: (Option<Decimal>,) = sqlx::query_as(
            r"
            SELECT SUM((response_json->>'realized_pnl_usd')::numeric)
            FROM trades
            WHERE base = $1 AND ts >= $2 AND role = 'close'
            ",
        )
        .bind(base)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_clonable_and_sized() {
        assert!(std::mem::size_of::<TradeRepository>() > 0);
    }
}
