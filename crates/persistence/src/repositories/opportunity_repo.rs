//! Opportunity repository: asynchronous, best-effort writes off the
//! tracker's read-only path. A failure here never blocks trading.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::models::OpportunityRecord;

#[derive(Debug, Clone)]
pub struct OpportunityRepository {
    pool: PgPool,
}

impl OpportunityRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert(&self, record: &OpportunityRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO opportunities
                (detected_at, base, perp_bid, perp_ask, spot_bid, spot_ask,
                 perp_bid_mean, perp_ask_mean, spot_bid_mean, spot_ask_mean,
                 perp_deviation_bps, spot_deviation_bps, perp_movement_bps, spot_movement_bps,
                 volatility_source, ratio, ioc_both_bps, ioc_perp_maker_spot_bps, maker_both_bps,
                 analysis_duration_us)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ",
        )
        .bind(record.detected_at)
        .bind(&record.base)
        .bind(record.perp_bid)
        .bind(record.perp_ask)
        .bind(record.spot_bid)
        .bind(record.spot_ask)
        .bind(record.perp_bid_mean)
        .bind(record.perp_ask_mean)
        .bind(record.spot_bid_mean)
        .bind(record.spot_ask_mean)
        .bind(record.perp_deviation_bps)
        .bind(record.spot_deviation_bps)
        .bind(record.perp_movement_bps)
        .bind(record.spot_movement_bps)
        .bind(&record.volatility_source)
        .bind(record.ratio)
        .bind(record.ioc_both_bps)
        .bind(record.ioc_perp_maker_spot_bps)
        .bind(record.maker_both_bps)
        .bind(record.analysis_duration_us)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn recent(&self, base: &str, since: DateTime<Utc>) -> Result<Vec<OpportunityRecord>> {
        let records = sqlx::query_as::<_, OpportunityRecord>(
            r"
            SELECT detected_at, base, perp_bid, perp_ask, spot_bid, spot_ask,
                   perp_bid_mean, perp_ask_mean, spot_bid_mean, spot_ask_mean,
                   perp_deviation_bps, spot_deviation_bps, perp_movement_bps, spot_movement_bps,
                   volatility_source, ratio, ioc_both_bps, ioc_perp_maker_spot_bps, maker_both_bps,
                   analysis_duration_us
            FROM opportunities
            WHERE base = $1 AND detected_at >= $2
            ORDER BY detected_at DESC
            ",
        )
        .bind(base)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

/// Fire-and-forget sink: the tracker pushes records into an unbounded
/// mpsc and a background task drains them one at a time. A write error
/// is logged, never propagated — the tracker must never see a
/// persistence failure.
#[derive(Clone)]
pub struct OpportunitySink {
    tx: mpsc::Sender<OpportunityRecord>,
}

impl OpportunitySink {
    #[must_use]
    pub fn spawn(repo: OpportunityRepository) -> Self {
        let (tx, mut rx) = mpsc::channel::<OpportunityRecord>(1024);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = repo.insert(&record).await {
                    error!(error = %err, "opportunity write failed, dropping record");
                }
            }
        });
        Self { tx }
    }

    pub fn push(&self, record: OpportunityRecord) {
        if self.tx.try_send(record).is_err() {
            warn!("opportunity sink channel full or closed, dropping record");
        }
    }
}
