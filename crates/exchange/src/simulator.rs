use anyhow::Result;
use async_trait::async_trait;
use basis_core::{ExchangeClient, LegResult, OrderSpec, TimeInForce};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

struct Balances {
    perp_free_usdc: Decimal,
    spot_usdc: Decimal,
    spot_base_qty: Decimal,
}

/// Deterministic in-process stand-in for the live exchange, used in
/// `DRY_RUN` mode and in engine/integration tests. Every order fills
/// immediately and completely at its requested price — there is no book to
/// cross, no latency, and no rejection path other than the ones callers
/// configure through [`SimulatedExchangeClient::set_reject_next`].
pub struct SimulatedExchangeClient {
    balances: Mutex<Balances>,
    resting: Mutex<HashMap<String, OrderSpec>>,
    next_order_id: AtomicU64,
    reject_next: Mutex<bool>,
    last_px: Mutex<HashMap<String, Decimal>>,
}

impl SimulatedExchangeClient {
    #[must_use]
    pub fn new(perp_free_usdc: Decimal, spot_usdc: Decimal, spot_base_qty: Decimal) -> Self {
        Self {
            balances: Mutex::new(Balances {
                perp_free_usdc,
                spot_usdc,
                spot_base_qty,
            }),
            resting: Mutex::new(HashMap::new()),
            next_order_id: AtomicU64::new(1),
            reject_next: Mutex::new(false),
            last_px: Mutex::new(HashMap::new()),
        }
    }

    /// Forces the next `place_order` call to be rejected, for exercising
    /// partial-fill and no-fill recovery paths in integration tests.
    pub fn set_reject_next(&self, reject: bool) {
        *self.reject_next.lock() = reject;
    }

    fn apply_fill(&self, spec: &OrderSpec) {
        if spec.instrument == basis_core::Instrument::Perp {
            return;
        }
        let mut balances = self.balances.lock();
        let notional = spec.size * spec.limit_px;
        if spec.is_buy {
            balances.spot_usdc -= notional;
            balances.spot_base_qty += spec.size;
        } else {
            balances.spot_usdc += notional;
            balances.spot_base_qty -= spec.size;
        }
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchangeClient {
    async fn place_order(&self, coin: &str, spec: OrderSpec) -> Result<LegResult> {
        if *self.reject_next.lock() {
            *self.reject_next.lock() = false;
            return Ok(LegResult::Rejected {
                reason: basis_core::RejectReason::Other,
            });
        }

        self.last_px.lock().insert(coin.to_string(), spec.limit_px);
        self.apply_fill(&spec);

        match spec.tif {
            TimeInForce::ImmediateOrCancel | TimeInForce::AddLiquidityOnly => {
                info!(%coin, ?spec.instrument, size = %spec.size, px = %spec.limit_px, "simulated fill");
                Ok(LegResult::Filled {
                    size_filled: spec.size,
                    avg_px: spec.limit_px,
                })
            }
        }
    }

    async fn await_fill(&self, _coin: &str, order_id: &str, _timeout_ms: u64) -> Result<LegResult> {
        if let Some(spec) = self.resting.lock().remove(order_id) {
            Ok(LegResult::Filled {
                size_filled: spec.size,
                avg_px: spec.limit_px,
            })
        } else {
            Ok(LegResult::Unknown)
        }
    }

    async fn cancel_order(&self, _coin: &str, order_id: &str) -> Result<()> {
        self.resting.lock().remove(order_id);
        Ok(())
    }

    async fn query_leg(&self, _coin: &str, _order_id: &str) -> Result<LegResult> {
        Ok(LegResult::Unknown)
    }

    async fn set_leverage(&self, _symbol: &str, _factor: u8, _is_cross: bool) -> Result<()> {
        Ok(())
    }

    async fn perp_free_usdc(&self) -> Result<Decimal> {
        Ok(self.balances.lock().perp_free_usdc)
    }

    async fn spot_usdc(&self) -> Result<Decimal> {
        Ok(self.balances.lock().spot_usdc)
    }

    async fn spot_base_qty(&self) -> Result<Decimal> {
        Ok(self.balances.lock().spot_base_qty)
    }

    async fn arm_deadman(&self, seconds: u64) -> Result<()> {
        info!(seconds, "simulated deadman armed (no-op)");
        Ok(())
    }

    /// No real book to quote; returns the last price this client traded
    /// `coin` at as both bid and ask, or zero if `coin` has never traded.
    async fn best_bid_ask(&self, coin: &str) -> Result<(Decimal, Decimal)> {
        let px = self.last_px.lock().get(coin).copied().unwrap_or(Decimal::ZERO);
        Ok((px, px))
    }
}

impl SimulatedExchangeClient {
    #[must_use]
    pub fn next_order_id(&self) -> String {
        self.next_order_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basis_core::Instrument;
    use rust_decimal_macros::dec;

    fn spot_buy(size: Decimal, px: Decimal) -> OrderSpec {
        OrderSpec {
            instrument: Instrument::Spot,
            is_buy: true,
            size,
            limit_px: px,
            tif: TimeInForce::ImmediateOrCancel,
            reduce_only: false,
        }
    }

    #[tokio::test]
    async fn fills_immediately_at_requested_price() {
        let sim = SimulatedExchangeClient::new(dec!(10000), dec!(5000), dec!(0));
        let result = sim.place_order("spot", spot_buy(dec!(1), dec!(100))).await.unwrap();
        assert!(matches!(result, LegResult::Filled { size_filled, avg_px } if size_filled == dec!(1) && avg_px == dec!(100)));
    }

    #[tokio::test]
    async fn spot_buy_debits_usdc_and_credits_base() {
        let sim = SimulatedExchangeClient::new(dec!(10000), dec!(5000), dec!(0));
        sim.place_order("spot", spot_buy(dec!(2), dec!(100))).await.unwrap();
        assert_eq!(sim.spot_usdc().await.unwrap(), dec!(4800));
        assert_eq!(sim.spot_base_qty().await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn forced_rejection_consumes_exactly_one_call() {
        let sim = SimulatedExchangeClient::new(dec!(10000), dec!(5000), dec!(0));
        sim.set_reject_next(true);
        let first = sim.place_order("spot", spot_buy(dec!(1), dec!(100))).await.unwrap();
        assert!(matches!(first, LegResult::Rejected { .. }));
        let second = sim.place_order("spot", spot_buy(dec!(1), dec!(100))).await.unwrap();
        assert!(second.is_filled());
    }
}
