use std::sync::Arc;

use basis_core::{CapitalError, Direction, ExchangeClient};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// Queries balances on demand (not cached beyond the call) and rules a
/// dispatch admissible or not, per the buffers in spec §4.4.
pub struct CapitalGuard {
    exchange: Arc<dyn ExchangeClient>,
}

const PERP_MARGIN_BUFFER: Decimal = dec!(1.2);
const SPOT_NOTIONAL_BUFFER: Decimal = dec!(1.05);

impl CapitalGuard {
    #[must_use]
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    /// Returns `Ok(())` if the dispatch is admissible, `Err(CapitalError)`
    /// with a structured reason otherwise.
    ///
    /// # Errors
    ///
    /// Returns `CapitalError::QueryFailed` if a balance query fails, or the
    /// relevant `Insufficient*` variant if the buffered requirement is not
    /// met.
    pub async fn check(
        &self,
        direction: Direction,
        notional_usd: Decimal,
        leverage: u8,
        mid: Decimal,
    ) -> Result<(), CapitalError> {
        let perp_free_usdc = self
            .exchange
            .perp_free_usdc()
            .await
            .map_err(|e| CapitalError::QueryFailed(e.to_string()))?;

        let required_margin = (notional_usd / Decimal::from(leverage)) * PERP_MARGIN_BUFFER;
        if perp_free_usdc < required_margin {
            return Err(CapitalError::InsufficientPerpMargin {
                have: perp_free_usdc,
                need: required_margin,
            });
        }

        match direction {
            Direction::PerpToSpot => {
                let spot_usdc = self
                    .exchange
                    .spot_usdc()
                    .await
                    .map_err(|e| CapitalError::QueryFailed(e.to_string()))?;
                let required = notional_usd * SPOT_NOTIONAL_BUFFER;
                if spot_usdc < required {
                    return Err(CapitalError::InsufficientSpotUsdc {
                        have: spot_usdc,
                        need: required,
                    });
                }
            }
            Direction::SpotToPerp => {
                let spot_base = self
                    .exchange
                    .spot_base_qty()
                    .await
                    .map_err(|e| CapitalError::QueryFailed(e.to_string()))?;
                let required = (notional_usd / mid) * SPOT_NOTIONAL_BUFFER;
                if spot_base < required {
                    return Err(CapitalError::InsufficientSpotBase {
                        have: spot_base,
                        need: required,
                    });
                }
            }
        }

        Ok(())
    }

    /// Convenience wrapper that logs a structured warning on refusal; does
    /// not change the `Result` returned.
    pub async fn check_logged(
        &self,
        direction: Direction,
        notional_usd: Decimal,
        leverage: u8,
        mid: Decimal,
    ) -> Result<(), CapitalError> {
        let result = self.check(direction, notional_usd, leverage, mid).await;
        if let Err(ref e) = result {
            warn!(direction = %direction, notional_usd = %notional_usd, error = %e, "capital guard refused dispatch");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basis_core::{Direction, LegResult, OrderSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeExchange {
        perp_free_usdc: Mutex<Decimal>,
        spot_usdc: Mutex<Decimal>,
        spot_base: Mutex<Decimal>,
    }

    #[async_trait]
    impl ExchangeClient for FakeExchange {
        async fn place_order(&self, _coin: &str, _spec: OrderSpec) -> anyhow::Result<LegResult> {
            unimplemented!()
        }
        async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
            unimplemented!()
        }
        async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
            unimplemented!()
        }
        async fn set_leverage(&self, _symbol: &str, _factor: u8, _is_cross: bool) -> anyhow::Result<()> {
            Ok(())
        }
        async fn perp_free_usdc(&self) -> anyhow::Result<Decimal> {
            Ok(*self.perp_free_usdc.lock().unwrap())
        }
        async fn spot_usdc(&self) -> anyhow::Result<Decimal> {
            Ok(*self.spot_usdc.lock().unwrap())
        }
        async fn spot_base_qty(&self) -> anyhow::Result<Decimal> {
            Ok(*self.spot_base.lock().unwrap())
        }
        async fn arm_deadman(&self, _seconds: u64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn best_bid_ask(&self, _coin: &str) -> anyhow::Result<(Decimal, Decimal)> {
            Ok((dec!(50), dec!(50)))
        }
    }

    fn exchange(perp: Decimal, spot_usdc: Decimal, spot_base: Decimal) -> Arc<FakeExchange> {
        Arc::new(FakeExchange {
            perp_free_usdc: Mutex::new(perp),
            spot_usdc: Mutex::new(spot_usdc),
            spot_base: Mutex::new(spot_base),
        })
    }

    #[tokio::test]
    async fn admits_perp_to_spot_when_buffers_satisfied() {
        // notional=12, leverage=3 -> required margin = (12/3)*1.2 = 4.8
        let ex = exchange(dec!(10), dec!(20), dec!(0));
        let guard = CapitalGuard::new(ex);
        let res = guard
            .check(Direction::PerpToSpot, dec!(12), 3, dec!(50))
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn refuses_perp_to_spot_on_insufficient_margin() {
        let ex = exchange(dec!(1), dec!(100), dec!(0));
        let guard = CapitalGuard::new(ex);
        let res = guard
            .check(Direction::PerpToSpot, dec!(12), 3, dec!(50))
            .await;
        assert!(matches!(res, Err(CapitalError::InsufficientPerpMargin { .. })));
    }

    #[tokio::test]
    async fn refuses_perp_to_spot_on_insufficient_spot_usdc() {
        let ex = exchange(dec!(100), dec!(1), dec!(0));
        let guard = CapitalGuard::new(ex);
        let res = guard
            .check(Direction::PerpToSpot, dec!(12), 3, dec!(50))
            .await;
        assert!(matches!(res, Err(CapitalError::InsufficientSpotUsdc { .. })));
    }

    #[tokio::test]
    async fn admits_spot_to_perp_when_base_qty_sufficient() {
        // need (12/50)*1.05 = 0.252
        let ex = exchange(dec!(100), dec!(0), dec!(1));
        let guard = CapitalGuard::new(ex);
        let res = guard
            .check(Direction::SpotToPerp, dec!(12), 3, dec!(50))
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn refuses_spot_to_perp_on_insufficient_base() {
        let ex = exchange(dec!(100), dec!(0), dec!(0.01));
        let guard = CapitalGuard::new(ex);
        let res = guard
            .check(Direction::SpotToPerp, dec!(12), 3, dec!(50))
            .await;
        assert!(matches!(res, Err(CapitalError::InsufficientSpotBase { .. })));
    }
}
