use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use basis_core::{
    DispatchError, Direction, ExchangeClient, HedgedPosition, Instrument, LegResult, OrderSpec,
    PositionStatus, TimeInForce,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};
use uuid::Uuid;

/// Static configuration for the dispatcher: symbols, leverage, sizing and
/// timing. Everything here is sourced from `EngineConfig`.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub perp_coin: String,
    pub spot_coin: String,
    pub leverage: u8,
    pub lot_step: Decimal,
    pub min_notional_usd: Decimal,
    pub alo_open_timeout_ms: u64,
    pub alo_close_timeout_ms: u64,
    pub slippage_bps: Decimal,
    pub deadman_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            perp_coin: "BTC".to_string(),
            spot_coin: "BTC-SPOT".to_string(),
            leverage: 3,
            lot_step: dec!(0.001),
            min_notional_usd: dec!(10),
            alo_open_timeout_ms: 150,
            alo_close_timeout_ms: 5000,
            slippage_bps: dec!(10),
            deadman_seconds: 5,
        }
    }
}

/// Snapshot of prices used for sizing/pricing a dispatch; distinct from
/// `basis_core::Tick` so call sites that only have a mid can still invoke the
/// pricing helpers directly (used by tests).
#[derive(Debug, Clone, Copy)]
pub struct PriceContext {
    pub perp_bid: Decimal,
    pub perp_ask: Decimal,
    pub spot_bid: Decimal,
    pub spot_ask: Decimal,
}

impl PriceContext {
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.perp_bid + self.perp_ask + self.spot_bid + self.spot_ask) / Decimal::from(4)
    }
}

impl From<&basis_core::Tick> for PriceContext {
    fn from(t: &basis_core::Tick) -> Self {
        Self {
            perp_bid: t.perp_bid,
            perp_ask: t.perp_ask,
            spot_bid: t.spot_bid,
            spot_ask: t.spot_ask,
        }
    }
}

/// Outcome of a flattened single leg used during partial-fill recovery.
#[derive(Debug, Clone)]
pub struct ClosePnl {
    pub realized_pnl_usd: Decimal,
    pub perp_fill: LegResult,
    pub spot_fill: LegResult,
}

/// The core engine: sizes the two legs for leverage parity, prices them per
/// the ALO-first/IOC-fallback policy, submits them concurrently, and
/// recovers atomically from partial fills. See spec §4.5.
pub struct OrderDispatcher {
    exchange: Arc<dyn ExchangeClient>,
    config: DispatcherConfig,
    /// Runtime override of the maker-first policy, flipped by the control
    /// surface's `set tif ioc` command: skips straight to the aggressive
    /// IOC fallback instead of waiting out the ALO timeout.
    force_ioc: AtomicBool,
}

/// Resolved outcome of sending both legs of one attempt (open or close).
enum TwoLegOutcome {
    BothFilled {
        perp: LegResult,
        spot: LegResult,
    },
    NoFill,
    /// Exactly one leg filled; the other is non-terminal-filled (rejected,
    /// cancelled, or unresolvable). Carries which instrument filled and its
    /// fill so the caller can flatten it.
    OneFilled {
        filled_instrument: Instrument,
        filled: LegResult,
    },
}

impl OrderDispatcher {
    #[must_use]
    pub fn new(exchange: Arc<dyn ExchangeClient>, config: DispatcherConfig) -> Self {
        Self {
            exchange,
            config,
            force_ioc: AtomicBool::new(false),
        }
    }

    /// Sets the `force_ioc` override: when `true`, `open`/`close` treat the
    /// ALO timeout as zero, so both legs fall back to aggressive IOC
    /// immediately instead of resting as maker orders first.
    pub fn set_force_ioc(&self, force_ioc: bool) {
        self.force_ioc.store(force_ioc, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_force_ioc(&self) -> bool {
        self.force_ioc.load(Ordering::SeqCst)
    }

    fn effective_alo_timeout_ms(&self, configured_ms: u64) -> u64 {
        if self.force_ioc.load(Ordering::SeqCst) {
            0
        } else {
            configured_ms
        }
    }

    /// `perp_size = spot_size = (notional_usd * leverage) / mid`, floored to
    /// the lot step. The spot leg hedges the *notional* of the leveraged
    /// perp leg, not the margin — the fix most likely to be omitted by a
    /// naive re-implementation.
    #[must_use]
    pub fn size_legs(&self, notional_usd: Decimal, mid: Decimal) -> Decimal {
        let raw = (notional_usd * Decimal::from(self.config.leverage)) / mid;
        Self::floor_to_lot(raw, self.config.lot_step)
    }

    fn floor_to_lot(size: Decimal, lot_step: Decimal) -> Decimal {
        if lot_step <= Decimal::ZERO {
            return size;
        }
        (size / lot_step).floor() * lot_step
    }

    /// Maker (`AddLiquidityOnly`) prices for an opening trade in the given
    /// direction: `(perp_px, spot_px)`.
    #[must_use]
    pub fn maker_open_prices(&self, direction: Direction, ctx: PriceContext) -> (Decimal, Decimal) {
        match direction {
            Direction::PerpToSpot => (ctx.perp_bid, ctx.spot_ask),
            Direction::SpotToPerp => (ctx.perp_ask, ctx.spot_bid),
        }
    }

    /// Aggressive (`ImmediateOrCancel`) prices with the given slippage, for
    /// an opening trade in the given direction.
    #[must_use]
    pub fn aggressive_open_prices(
        &self,
        direction: Direction,
        ctx: PriceContext,
        slippage_bps: Decimal,
    ) -> (Decimal, Decimal) {
        let factor = slippage_bps / Decimal::from(10_000);
        match direction {
            Direction::PerpToSpot => (
                ctx.perp_bid * (Decimal::ONE - factor),
                ctx.spot_ask * (Decimal::ONE + factor),
            ),
            Direction::SpotToPerp => (
                ctx.perp_ask * (Decimal::ONE + factor),
                ctx.spot_bid * (Decimal::ONE - factor),
            ),
        }
    }

    /// Opens a new hedged position. See spec §4.5 for the full state
    /// machine; this orchestrates sizing, maker-first submission, IOC
    /// fallback and partial-fill recovery.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::NoFill` if neither leg fills,
    /// `DispatchError::PartialRecovered` if one leg filled and was
    /// successfully flattened, or `DispatchError::BrokenHedge` if the
    /// flatten itself failed.
    pub async fn open(
        &self,
        direction: Direction,
        notional_usd: Decimal,
        tick: &basis_core::Tick,
        edge_bps: Decimal,
    ) -> Result<HedgedPosition, DispatchError> {
        let ctx = PriceContext::from(tick);
        let mid = ctx.mid();
        let size = self.size_legs(notional_usd, mid);

        if size * mid < self.config.min_notional_usd {
            warn!(notional_usd = %notional_usd, size = %size, "dispatch below minimum notional, refusing");
            return Err(DispatchError::NoFill);
        }

        let (maker_perp_px, maker_spot_px) = self.maker_open_prices(direction, ctx);

        let outcome = self
            .execute_two_leg(
                direction,
                size,
                size,
                maker_perp_px,
                maker_spot_px,
                ctx,
                self.effective_alo_timeout_ms(self.config.alo_open_timeout_ms),
                false,
            )
            .await?;

        match outcome {
            TwoLegOutcome::BothFilled { perp, spot } => {
                let (perp_filled, spot_filled) = (extract_size(&perp), extract_size(&spot));
                let position = HedgedPosition {
                    id: Uuid::new_v4(),
                    direction,
                    opened_at: Utc::now(),
                    notional_usd,
                    perp_size: perp_filled,
                    spot_size: spot_filled,
                    open_edge_bps: edge_bps,
                    status: PositionStatus::Open,
                    realized_pnl_usd: None,
                    closed_at: None,
                };
                self.exchange
                    .arm_deadman(self.config.deadman_seconds)
                    .await
                    .map_err(|e| DispatchError::ExchangeError(e.to_string()))?;
                info!(position_id = %position.id, direction = %direction, notional_usd = %notional_usd, "hedged position opened");
                Ok(position)
            }
            TwoLegOutcome::NoFill => Err(DispatchError::NoFill),
            TwoLegOutcome::OneFilled {
                filled_instrument,
                filled,
            } => {
                self.recover_partial_fill(direction, filled_instrument, filled, notional_usd)
                    .await?;
                unreachable!("recover_partial_fill always returns Err")
            }
        }
    }

    /// Closes an existing hedged position using the reverse direction, with
    /// `reduce_only` set on the perp leg.
    ///
    /// # Errors
    ///
    /// Same variants as [`Self::open`].
    pub async fn close(
        &self,
        position: &HedgedPosition,
        tick: &basis_core::Tick,
    ) -> Result<ClosePnl, DispatchError> {
        let ctx = PriceContext::from(tick);
        let close_direction = position.direction.opposite();
        let (maker_perp_px, maker_spot_px) = self.maker_open_prices(close_direction, ctx);

        let outcome = self
            .execute_two_leg(
                close_direction,
                position.perp_size,
                position.spot_size,
                maker_perp_px,
                maker_spot_px,
                ctx,
                self.effective_alo_timeout_ms(self.config.alo_close_timeout_ms),
                true,
            )
            .await?;

        match outcome {
            TwoLegOutcome::BothFilled { perp, spot } => {
                let realized = self.estimate_close_pnl(position, &perp, &spot);
                info!(position_id = %position.id, realized_pnl_usd = %realized, "position closed");
                Ok(ClosePnl {
                    realized_pnl_usd: realized,
                    perp_fill: perp,
                    spot_fill: spot,
                })
            }
            TwoLegOutcome::NoFill => Err(DispatchError::NoFill),
            TwoLegOutcome::OneFilled {
                filled_instrument,
                filled,
            } => {
                self.recover_partial_fill(
                    close_direction,
                    filled_instrument,
                    filled,
                    position.notional_usd,
                )
                .await?;
                unreachable!("recover_partial_fill always returns Err")
            }
        }
    }

    /// Delta-neutral positions cancel directional mid drift across legs, so
    /// realized P&L is the edge captured at open, applied to the notional.
    /// `perp`/`spot` are both known `Filled` by the time this is called.
    fn estimate_close_pnl(&self, position: &HedgedPosition, _perp: &LegResult, _spot: &LegResult) -> Decimal {
        position.open_edge_bps / Decimal::from(10_000) * position.notional_usd
    }

    /// Used only by partial-fill recovery: flattens a single filled leg with
    /// an aggressive IOC order in the reverse direction. `reduce_only=true`
    /// is applied automatically for the perp instrument.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::ExchangeError` if the flatten order itself
    /// cannot be placed or does not fill.
    pub async fn close_single_leg(
        &self,
        instrument: Instrument,
        size: Decimal,
        reverse_is_buy: bool,
        ctx: PriceContext,
    ) -> Result<(), DispatchError> {
        let factor = self.config.slippage_bps / Decimal::from(10_000);
        let (coin, limit_px) = match instrument {
            Instrument::Perp => {
                let px = if reverse_is_buy {
                    ctx.perp_ask * (Decimal::ONE + factor)
                } else {
                    ctx.perp_bid * (Decimal::ONE - factor)
                };
                (self.config.perp_coin.as_str(), px)
            }
            Instrument::Spot => {
                let px = if reverse_is_buy {
                    ctx.spot_ask * (Decimal::ONE + factor)
                } else {
                    ctx.spot_bid * (Decimal::ONE - factor)
                };
                (self.config.spot_coin.as_str(), px)
            }
        };

        let spec = OrderSpec {
            instrument,
            is_buy: reverse_is_buy,
            size,
            limit_px,
            tif: TimeInForce::ImmediateOrCancel,
            reduce_only: instrument == Instrument::Perp,
        };

        let result = self
            .exchange
            .place_order(coin, spec)
            .await
            .map_err(|e| DispatchError::ExchangeError(e.to_string()))?;

        if result.is_filled() {
            Ok(())
        } else {
            Err(DispatchError::ExchangeError(format!(
                "flatten attempt did not fill: {result:?}"
            )))
        }
    }

    /// Flattens the single leg that filled when the other leg of a dispatch
    /// attempt did not. Always returns `Err`: reaching this path means the
    /// dispatch as a whole did not open (or close) cleanly, whether or not
    /// the flatten itself succeeded.
    async fn recover_partial_fill(
        &self,
        direction: Direction,
        filled_instrument: Instrument,
        filled: LegResult,
        notional_usd: Decimal,
    ) -> Result<std::convert::Infallible, DispatchError> {
        let size = extract_size(&filled);
        // Flatten by reversing whatever side was taken on open.
        let reverse_is_buy = match (filled_instrument, direction) {
            (Instrument::Perp, Direction::PerpToSpot) => true, // was sold, buy back
            (Instrument::Perp, Direction::SpotToPerp) => false, // was bought, sell back
            (Instrument::Spot, Direction::PerpToSpot) => false, // was bought, sell back
            (Instrument::Spot, Direction::SpotToPerp) => true, // was sold, buy back
        };

        // Recovery uses the last-known prices; a real exchange client would
        // refresh the book first, but the dispatcher has no tick of its own
        // at this point so it falls back to the filled price with slippage
        // already baked into `close_single_leg`.
        let avg_px = match &filled {
            LegResult::Filled { avg_px, .. } => *avg_px,
            _ => Decimal::ONE,
        };
        let ctx = PriceContext {
            perp_bid: avg_px,
            perp_ask: avg_px,
            spot_bid: avg_px,
            spot_ask: avg_px,
        };

        match self
            .close_single_leg(filled_instrument, size, reverse_is_buy, ctx)
            .await
        {
            Ok(()) => {
                warn!(direction = %direction, notional_usd = %notional_usd, "partial fill recovered, unhedged leg flattened");
                Err(DispatchError::PartialRecovered {
                    direction,
                    notional_usd,
                })
            }
            Err(flatten_err) => {
                warn!(direction = %direction, notional_usd = %notional_usd, error = %flatten_err, "broken hedge: flatten failed");
                Err(DispatchError::BrokenHedge {
                    direction,
                    exposure_size: size,
                    flatten_error: flatten_err.to_string(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_two_leg(
        &self,
        direction: Direction,
        perp_size: Decimal,
        spot_size: Decimal,
        maker_perp_px: Decimal,
        maker_spot_px: Decimal,
        ctx: PriceContext,
        alo_timeout_ms: u64,
        reduce_only_perp: bool,
    ) -> Result<TwoLegOutcome, DispatchError> {
        let perp_spec = OrderSpec {
            instrument: Instrument::Perp,
            is_buy: direction.perp_is_buy_on_open(),
            size: perp_size,
            limit_px: maker_perp_px,
            tif: TimeInForce::AddLiquidityOnly,
            reduce_only: reduce_only_perp,
        };
        let spot_spec = OrderSpec {
            instrument: Instrument::Spot,
            is_buy: direction.spot_is_buy_on_open(),
            size: spot_size,
            limit_px: maker_spot_px,
            tif: TimeInForce::AddLiquidityOnly,
            reduce_only: false,
        };

        let (perp_ack, spot_ack) = tokio::join!(
            self.exchange.place_order(&self.config.perp_coin, perp_spec),
            self.exchange.place_order(&self.config.spot_coin, spot_spec),
        );

        let perp_ack = perp_ack.map_err(|e| DispatchError::ExchangeError(e.to_string()))?;
        let spot_ack = spot_ack.map_err(|e| DispatchError::ExchangeError(e.to_string()))?;

        let (perp_final, spot_final) = tokio::join!(
            self.resolve_ack(&self.config.perp_coin, perp_ack, alo_timeout_ms),
            self.resolve_ack(&self.config.spot_coin, spot_ack, alo_timeout_ms),
        );
        let mut perp_final = perp_final?;
        let mut spot_final = spot_final?;

        if !(perp_final.is_filled() && spot_final.is_filled()) {
            let (aggr_perp_px, aggr_spot_px) =
                self.aggressive_open_prices(direction, ctx, self.config.slippage_bps);

            if !perp_final.is_filled() {
                perp_final = self
                    .reissue_ioc(
                        Instrument::Perp,
                        &self.config.perp_coin,
                        perp_size,
                        direction.perp_is_buy_on_open(),
                        aggr_perp_px,
                        reduce_only_perp,
                    )
                    .await?;
            }
            if !spot_final.is_filled() {
                spot_final = self
                    .reissue_ioc(
                        Instrument::Spot,
                        &self.config.spot_coin,
                        spot_size,
                        direction.spot_is_buy_on_open(),
                        aggr_spot_px,
                        false,
                    )
                    .await?;
            }
        }

        Ok(match (perp_final.is_filled(), spot_final.is_filled()) {
            (true, true) => TwoLegOutcome::BothFilled {
                perp: perp_final,
                spot: spot_final,
            },
            (true, false) => TwoLegOutcome::OneFilled {
                filled_instrument: Instrument::Perp,
                filled: perp_final,
            },
            (false, true) => TwoLegOutcome::OneFilled {
                filled_instrument: Instrument::Spot,
                filled: spot_final,
            },
            (false, false) => TwoLegOutcome::NoFill,
        })
    }

    async fn resolve_ack(
        &self,
        coin: &str,
        ack: LegResult,
        alo_timeout_ms: u64,
    ) -> Result<LegResult, DispatchError> {
        match ack {
            LegResult::Resting { order_id } => {
                let resolved = self
                    .exchange
                    .await_fill(coin, &order_id, alo_timeout_ms)
                    .await
                    .map_err(|e| DispatchError::ExchangeError(e.to_string()))?;
                if matches!(resolved, LegResult::Unknown) {
                    let _ = self.exchange.cancel_order(coin, &order_id).await;
                    let requeried = self
                        .exchange
                        .query_leg(coin, &order_id)
                        .await
                        .map_err(|e| DispatchError::ExchangeError(e.to_string()))?;
                    return Ok(requeried);
                }
                Ok(resolved)
            }
            other => Ok(other),
        }
    }

    /// Aggressive IOC price for one side of the book: the ask (with
    /// slippage added) when buying, the bid (with slippage subtracted) when
    /// selling — the same convention as `aggressive_open_prices`.
    fn aggressive_price(is_buy: bool, bid: Decimal, ask: Decimal, slippage_bps: Decimal) -> Decimal {
        let factor = slippage_bps / Decimal::from(10_000);
        if is_buy {
            ask * (Decimal::ONE + factor)
        } else {
            bid * (Decimal::ONE - factor)
        }
    }

    /// First attempt at `first_px`. If the mid has moved since `first_px`
    /// was computed such that this IOC would now be passive, re-prices once
    /// against a freshly-fetched tick (spec §4.5). If that also fails, it
    /// escalates slippage by 10 bps off that same fresh tick for one more
    /// attempt, then gives up (the leg stays non-terminal and the caller
    /// treats the whole dispatch as `NoFill` or partial, per spec §4.5
    /// tie-break rules).
    async fn reissue_ioc(
        &self,
        instrument: Instrument,
        coin: &str,
        size: Decimal,
        is_buy: bool,
        first_px: Decimal,
        reduce_only: bool,
    ) -> Result<LegResult, DispatchError> {
        let first = self
            .place_ioc(coin, instrument, size, is_buy, first_px, reduce_only)
            .await?;
        if first.is_filled() {
            return Ok(first);
        }

        let (bid, ask) = self
            .exchange
            .best_bid_ask(coin)
            .await
            .map_err(|e| DispatchError::ExchangeError(e.to_string()))?;
        let repriced_px = Self::aggressive_price(is_buy, bid, ask, self.config.slippage_bps);
        let second = self
            .place_ioc(coin, instrument, size, is_buy, repriced_px, reduce_only)
            .await?;
        if second.is_filled() {
            return Ok(second);
        }

        let escalated_px = Self::aggressive_price(is_buy, bid, ask, self.config.slippage_bps + dec!(10));
        self.place_ioc(coin, instrument, size, is_buy, escalated_px, reduce_only)
            .await
    }

    async fn place_ioc(
        &self,
        coin: &str,
        instrument: Instrument,
        size: Decimal,
        is_buy: bool,
        limit_px: Decimal,
        reduce_only: bool,
    ) -> Result<LegResult, DispatchError> {
        let spec = OrderSpec {
            instrument,
            is_buy,
            size,
            limit_px,
            tif: TimeInForce::ImmediateOrCancel,
            reduce_only,
        };
        self.exchange
            .place_order(coin, spec)
            .await
            .map_err(|e| DispatchError::ExchangeError(e.to_string()))
    }
}

fn extract_size(result: &LegResult) -> Decimal {
    match result {
        LegResult::Filled { size_filled, .. } => *size_filled,
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use basis_core::{RejectReason, Tick};
    use std::sync::Mutex;

    struct ScriptedExchange {
        perp_result: Mutex<Option<LegResult>>,
        spot_result: Mutex<Option<LegResult>>,
        perp_ioc_result: Mutex<Option<LegResult>>,
        spot_ioc_result: Mutex<Option<LegResult>>,
        flatten_result: Mutex<Option<LegResult>>,
    }

    impl ScriptedExchange {
        fn both_fill() -> Self {
            Self {
                perp_result: Mutex::new(Some(LegResult::Filled {
                    size_filled: dec!(0.72),
                    avg_px: dec!(50.00),
                })),
                spot_result: Mutex::new(Some(LegResult::Filled {
                    size_filled: dec!(0.72),
                    avg_px: dec!(50.005),
                })),
                perp_ioc_result: Mutex::new(None),
                spot_ioc_result: Mutex::new(None),
                flatten_result: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedExchange {
        async fn place_order(&self, coin: &str, spec: OrderSpec) -> anyhow::Result<LegResult> {
            let is_ioc = spec.tif == TimeInForce::ImmediateOrCancel;
            let is_perp = coin.contains("BTC") && !coin.contains("SPOT");
            let slot = if is_ioc {
                if is_perp {
                    &self.perp_ioc_result
                } else {
                    &self.spot_ioc_result
                }
            } else if is_perp {
                &self.perp_result
            } else {
                &self.spot_result
            };
            let mut guard = slot.lock().unwrap();
            Ok(guard.take().unwrap_or(LegResult::Cancelled))
        }
        async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
            unreachable!("this fake never returns Resting")
        }
        async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
            Ok(LegResult::Cancelled)
        }
        async fn set_leverage(&self, _symbol: &str, _factor: u8, _is_cross: bool) -> anyhow::Result<()> {
            Ok(())
        }
        async fn perp_free_usdc(&self) -> anyhow::Result<Decimal> {
            Ok(dec!(1000))
        }
        async fn spot_usdc(&self) -> anyhow::Result<Decimal> {
            Ok(dec!(1000))
        }
        async fn spot_base_qty(&self) -> anyhow::Result<Decimal> {
            Ok(dec!(10))
        }
        async fn arm_deadman(&self, _seconds: u64) -> anyhow::Result<()> {
            Ok(())
        }
        async fn best_bid_ask(&self, _coin: &str) -> anyhow::Result<(Decimal, Decimal)> {
            Ok((dec!(50.00), dec!(50.01)))
        }
    }

    fn tick() -> Tick {
        Tick {
            perp_bid: dec!(50.00),
            perp_ask: dec!(50.01),
            spot_bid: dec!(50.005),
            spot_ask: dec!(50.005),
            recv_ms: 0,
            send_ms: None,
        }
    }

    #[tokio::test]
    async fn normal_maker_open_fills_both_legs() {
        let exchange = Arc::new(ScriptedExchange::both_fill());
        let dispatcher = OrderDispatcher::new(exchange, DispatcherConfig::default());
        let position = dispatcher
            .open(Direction::PerpToSpot, dec!(12), &tick(), dec!(20))
            .await
            .unwrap();
        assert_eq!(position.direction, Direction::PerpToSpot);
        assert_eq!(position.perp_size, dec!(0.72));
        assert!(position.is_delta_neutral(dec!(0.001)));
    }

    #[tokio::test]
    async fn perp_to_spot_open_uses_correct_leg_sides() {
        // Historically-miscoded invariant: perp sells (is_buy=false), spot buys.
        let exchange = Arc::new(ScriptedExchange::both_fill());
        let dispatcher = OrderDispatcher::new(Arc::clone(&exchange) as Arc<dyn ExchangeClient>, DispatcherConfig::default());
        assert!(!Direction::PerpToSpot.perp_is_buy_on_open());
        assert!(Direction::PerpToSpot.spot_is_buy_on_open());
        let _ = dispatcher
            .open(Direction::PerpToSpot, dec!(12), &tick(), dec!(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn partial_fill_on_open_falls_back_to_ioc_and_succeeds() {
        let exchange = Arc::new(ScriptedExchange {
            perp_result: Mutex::new(Some(LegResult::Filled {
                size_filled: dec!(0.72),
                avg_px: dec!(50.00),
            })),
            spot_result: Mutex::new(Some(LegResult::Rejected {
                reason: RejectReason::PostOnlyCross,
            })),
            perp_ioc_result: Mutex::new(None),
            spot_ioc_result: Mutex::new(Some(LegResult::Filled {
                size_filled: dec!(0.72),
                avg_px: dec!(50.055),
            })),
            flatten_result: Mutex::new(None),
        });
        let dispatcher = OrderDispatcher::new(exchange, DispatcherConfig::default());
        let position = dispatcher
            .open(Direction::PerpToSpot, dec!(12), &tick(), dec!(20))
            .await
            .unwrap();
        assert_eq!(position.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn broken_hedge_when_flatten_also_fails() {
        let exchange = Arc::new(ScriptedExchange {
            perp_result: Mutex::new(Some(LegResult::Filled {
                size_filled: dec!(0.72),
                avg_px: dec!(50.00),
            })),
            spot_result: Mutex::new(Some(LegResult::Rejected {
                reason: RejectReason::Other,
            })),
            perp_ioc_result: Mutex::new(Some(LegResult::Cancelled)),
            spot_ioc_result: Mutex::new(Some(LegResult::Rejected {
                reason: RejectReason::Other,
            })),
            flatten_result: Mutex::new(Some(LegResult::Cancelled)),
        });
        let dispatcher = OrderDispatcher::new(exchange, DispatcherConfig::default());
        let err = dispatcher
            .open(Direction::PerpToSpot, dec!(12), &tick(), dec!(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BrokenHedge { .. }));
    }

    #[tokio::test]
    async fn neither_leg_fills_is_no_fill_with_no_state_change() {
        let exchange = Arc::new(ScriptedExchange {
            perp_result: Mutex::new(Some(LegResult::Rejected {
                reason: RejectReason::Other,
            })),
            spot_result: Mutex::new(Some(LegResult::Rejected {
                reason: RejectReason::Other,
            })),
            perp_ioc_result: Mutex::new(Some(LegResult::Cancelled)),
            spot_ioc_result: Mutex::new(Some(LegResult::Cancelled)),
            flatten_result: Mutex::new(None),
        });
        let dispatcher = OrderDispatcher::new(exchange, DispatcherConfig::default());
        let err = dispatcher
            .open(Direction::PerpToSpot, dec!(12), &tick(), dec!(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoFill));
    }

    #[test]
    fn leg_sizing_uses_leverage_parity_not_margin() {
        let dispatcher = OrderDispatcher::new(
            Arc::new(ScriptedExchange::both_fill()),
            DispatcherConfig {
                leverage: 3,
                lot_step: dec!(0.01),
                ..DispatcherConfig::default()
            },
        );
        // notional=12, leverage=3, mid=50 -> (12*3)/50 = 0.72
        let size = dispatcher.size_legs(dec!(12), dec!(50));
        assert_eq!(size, dec!(0.72));
    }

    #[test]
    fn leg_sizing_floors_to_lot_step() {
        let dispatcher = OrderDispatcher::new(
            Arc::new(ScriptedExchange::both_fill()),
            DispatcherConfig {
                leverage: 3,
                lot_step: dec!(0.1),
                ..DispatcherConfig::default()
            },
        );
        let size = dispatcher.size_legs(dec!(12), dec!(50));
        assert_eq!(size, dec!(0.7));
    }

    #[tokio::test]
    async fn ioc_reissue_reprices_against_a_fresh_tick_before_escalating() {
        struct RepricingExchange {
            attempts: Mutex<Vec<Decimal>>,
        }
        #[async_trait]
        impl ExchangeClient for RepricingExchange {
            async fn place_order(&self, _coin: &str, spec: OrderSpec) -> anyhow::Result<LegResult> {
                self.attempts.lock().unwrap().push(spec.limit_px);
                Ok(LegResult::Rejected {
                    reason: RejectReason::Other,
                })
            }
            async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
                unreachable!()
            }
            async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
                Ok(LegResult::Cancelled)
            }
            async fn set_leverage(&self, _symbol: &str, _factor: u8, _is_cross: bool) -> anyhow::Result<()> {
                Ok(())
            }
            async fn perp_free_usdc(&self) -> anyhow::Result<Decimal> {
                Ok(dec!(1000))
            }
            async fn spot_usdc(&self) -> anyhow::Result<Decimal> {
                Ok(dec!(1000))
            }
            async fn spot_base_qty(&self) -> anyhow::Result<Decimal> {
                Ok(dec!(10))
            }
            async fn arm_deadman(&self, _seconds: u64) -> anyhow::Result<()> {
                Ok(())
            }
            async fn best_bid_ask(&self, _coin: &str) -> anyhow::Result<(Decimal, Decimal)> {
                // market has moved well past the stale dispatch-time price
                Ok((dec!(60.00), dec!(60.02)))
            }
        }

        let exchange = Arc::new(RepricingExchange {
            attempts: Mutex::new(Vec::new()),
        });
        let dispatcher = OrderDispatcher::new(Arc::clone(&exchange) as Arc<dyn ExchangeClient>, DispatcherConfig::default());
        let result = dispatcher
            .reissue_ioc(Instrument::Perp, "BTC", dec!(0.72), true, dec!(50.00), false)
            .await
            .unwrap();
        assert!(!result.is_filled());

        let attempts = exchange.attempts.lock().unwrap().clone();
        assert_eq!(
            attempts.len(),
            3,
            "initial attempt at the stale price, one re-price against the fresh tick, then one slippage escalation"
        );
        assert_eq!(attempts[0], dec!(50.00), "first attempt uses the stale dispatch-time price");
        assert!(
            attempts[1] > dec!(60.02),
            "second attempt re-prices off the fresh ask of 60.02, got {}",
            attempts[1]
        );
        assert!(
            attempts[2] > attempts[1],
            "third attempt escalates slippage further than the plain re-price"
        );
    }

    #[test]
    fn maker_prices_perp_to_spot_sells_perp_buys_spot() {
        let dispatcher = OrderDispatcher::new(Arc::new(ScriptedExchange::both_fill()), DispatcherConfig::default());
        let ctx = PriceContext {
            perp_bid: dec!(50.00),
            perp_ask: dec!(50.02),
            spot_bid: dec!(49.95),
            spot_ask: dec!(49.97),
        };
        let (perp_px, spot_px) = dispatcher.maker_open_prices(Direction::PerpToSpot, ctx);
        assert_eq!(perp_px, ctx.perp_bid);
        assert_eq!(spot_px, ctx.spot_ask);
    }
}
