//! Position repository: synchronous upserts on every lifecycle
//! transition (`Open -> Closing -> Closed`/`Broken`).

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::PositionRecord;

#[derive(Debug, Clone)]
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert(&self, record: &PositionRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO positions
                (id, direction, opened_at, notional_usd, perp_size, spot_size,
                 open_edge_bps, status, realized_pnl_usd, closed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                realized_pnl_usd = EXCLUDED.realized_pnl_usd,
                closed_at = EXCLUDED.closed_at
            ",
        )
        .bind(record.id)
        .bind(&record.direction)
        .bind(record.opened_at)
        .bind(record.notional_usd)
        .bind(record.perp_size)
        .bind(record.spot_size)
        .bind(record.open_edge_bps)
        .bind(&record.status)
        .bind(record.realized_pnl_usd)
        .bind(record.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All positions currently `open` or `closing`, for startup recovery
    /// and the `positions` control-surface command.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn open_positions(&self) -> Result<Vec<PositionRecord>> {
        let records = sqlx::query_as::<_, PositionRecord>(
            r"
            SELECT id, direction, opened_at, notional_usd, perp_size, spot_size,
                   open_edge_bps, status, realized_pnl_usd, closed_at
            FROM positions
            WHERE status IN ('open', 'closing')
            ORDER BY opened_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find(&self, id: Uuid) -> Result<Option<PositionRecord>> {
        let record = sqlx::query_as::<_, PositionRecord>(
            r"
            SELECT id, direction, opened_at, notional_usd, perp_size, spot_size,
                   open_edge_bps, status, realized_pnl_usd, closed_at
            FROM positions
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_clonable_and_sized() {
        assert!(std::mem::size_of::<PositionRepository>() > 0);
    }
}
