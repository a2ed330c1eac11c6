//! Edge repository: batch-only writes, accumulated by an `EdgeBatcher`
//! rather than issued synchronously from the hot path.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::models::EdgeRecord;

const MAX_BATCH: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EdgeRepository {
    pool: PgPool,
}

impl EdgeRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts up to `MAX_BATCH` rows per flush, idempotent on replay.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_batch(&self, records: &[EdgeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in records.chunks(MAX_BATCH) {
            for record in chunk {
                sqlx::query(
                    r"
                    INSERT INTO edges
                        (ts, base, spot_index, edge_ps_mm_bps, edge_sp_mm_bps, mid_ref, recv_ms, send_ms)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (ts, base, spot_index) DO NOTHING
                    ",
                )
                .bind(record.ts)
                .bind(&record.base)
                .bind(record.spot_index)
                .bind(record.edge_ps_mm_bps)
                .bind(record.edge_sp_mm_bps)
                .bind(record.mid_ref)
                .bind(record.recv_ms)
                .bind(record.send_ms)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_by_time_range(
        &self,
        base: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EdgeRecord>> {
        let records = sqlx::query_as::<_, EdgeRecord>(
            r"
            SELECT ts, base, spot_index, edge_ps_mm_bps, edge_sp_mm_bps, mid_ref, recv_ms, send_ms
            FROM edges
            WHERE base = $1 AND ts >= $2 AND ts <= $3
            ORDER BY ts ASC
            ",
        )
        .bind(base)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// Accumulates edge samples off the hot path and flushes them to
/// [`EdgeRepository`] whichever comes first: `MAX_BATCH` rows accumulated or
/// `FLUSH_INTERVAL` elapsed. `push` never blocks the caller on I/O; a full
/// channel drops the sample with a warning rather than applying backpressure
/// to the trading loop.
#[derive(Clone)]
pub struct EdgeBatcher {
    tx: mpsc::Sender<EdgeRecord>,
}

impl EdgeBatcher {
    #[must_use]
    pub fn spawn(repo: EdgeRepository) -> Self {
        let (tx, mut rx) = mpsc::channel::<EdgeRecord>(4096);

        tokio::spawn(async move {
            let mut buffer = Vec::with_capacity(MAX_BATCH);
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    maybe_record = rx.recv() => {
                        match maybe_record {
                            Some(record) => {
                                buffer.push(record);
                                if buffer.len() >= MAX_BATCH {
                                    flush(&repo, &mut buffer).await;
                                }
                            }
                            None => {
                                flush(&repo, &mut buffer).await;
                                return;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        flush(&repo, &mut buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn push(&self, record: EdgeRecord) {
        if self.tx.try_send(record).is_err() {
            warn!("edge batcher channel full or closed, dropping sample");
        }
    }
}

async fn flush(repo: &EdgeRepository, buffer: &mut Vec<EdgeRecord>) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = repo.insert_batch(buffer).await {
        error!(error = %err, "edge batch flush failed, dropping batch");
    }
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_clonable_and_sized() {
        assert!(std::mem::size_of::<EdgeRepository>() > 0);
    }
}
