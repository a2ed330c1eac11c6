use crate::types::{LegResult, OrderSpec, Tick};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Abstract capabilities consumed from the exchange collaborator. The
/// concrete REST/WebSocket client is out of scope for this crate; production
/// deployments supply their own implementation, while dry-run and tests use
/// the deterministic simulator in `basis-exchange`.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Place a single order leg. IOC legs return a terminal result
    /// (`Filled`/`Rejected`/`Cancelled`) immediately; ALO legs typically
    /// return `Resting` with the exchange's order id, to be joined with
    /// `await_fill`. Implementations must treat an inner `status=rejected`
    /// inside an otherwise-successful envelope as `LegResult::Rejected`.
    async fn place_order(&self, coin: &str, spec: OrderSpec) -> Result<LegResult>;

    /// Waits up to `timeout_ms` for a resting order to fill, returning
    /// `Filled`, `Cancelled`, or `Unknown` if the wait times out without a
    /// definitive answer (the caller must then cancel and/or query).
    async fn await_fill(&self, coin: &str, order_id: &str, timeout_ms: u64) -> Result<LegResult>;

    /// Cancel a resting order by exchange-assigned id.
    async fn cancel_order(&self, coin: &str, order_id: &str) -> Result<()>;

    /// Query a position/order's latest state when a response was ambiguous.
    async fn query_leg(&self, coin: &str, order_id: &str) -> Result<LegResult>;

    /// Set leverage for the perp symbol.
    async fn set_leverage(&self, symbol: &str, factor: u8, is_cross: bool) -> Result<()>;

    /// Free USDC available in the perp margin account.
    async fn perp_free_usdc(&self) -> Result<Decimal>;

    /// Free USDC in the spot wallet.
    async fn spot_usdc(&self) -> Result<Decimal>;

    /// Base-asset quantity held in the spot wallet.
    async fn spot_base_qty(&self) -> Result<Decimal>;

    /// Schedule a server-side cancel-all that fires unless re-armed.
    async fn arm_deadman(&self, seconds: u64) -> Result<()>;

    /// Current top-of-book `(bid, ask)` for `coin`, queried on demand. Used
    /// by the dispatcher to re-price an IOC leg against the current tick
    /// before escalating slippage, when the book has moved since the price
    /// it was first dispatched with.
    async fn best_bid_ask(&self, coin: &str) -> Result<(Decimal, Decimal)>;
}

/// Live top-of-book source for both legs. The concrete subscription/backoff
/// machinery lives in `basis-exchange`; engine code depends only on this.
#[async_trait]
pub trait TickSource: Send + Sync {
    /// Waits for and returns the next merged tick, or an error on a feed
    /// failure that the caller should treat per `FeedError` semantics.
    async fn next_tick(&mut self) -> Result<Tick>;
}
