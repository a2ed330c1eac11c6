//! Persistence adapter for the arbitrage engine.
//!
//! Writes to `edges` are asynchronous and batched (§6: ≤100 records or
//! 1 s); writes to `trades` and position lifecycle events are
//! synchronous so a crash cannot lose a trade the operator believes
//! happened. Opportunity records are best-effort and never block the
//! trading path.

pub mod models;
pub mod repositories;

pub use models::{EdgeRecord, OpportunityRecord, PositionRecord, TradeRecord, TradeRole};
pub use repositories::{
    EdgeBatcher, EdgeRepository, OpportunityRepository, OpportunitySink, PositionRepository,
    TradeRepository,
};

use anyhow::Result;
use sqlx::PgPool;

/// Bundles one pool into a repository per relation, the shape the
/// control surface and engine hold onto for the process lifetime.
#[derive(Clone)]
pub struct Repositories {
    pub edges: EdgeRepository,
    pub trades: TradeRepository,
    pub positions: PositionRepository,
    pub opportunities: OpportunityRepository,
}

impl Repositories {
    /// # Errors
    /// Returns an error if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            edges: EdgeRepository::new(pool.clone()),
            trades: TradeRepository::new(pool.clone()),
            positions: PositionRepository::new(pool.clone()),
            opportunities: OpportunityRepository::new(pool),
        }
    }
}
