use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use basis_core::{ExchangeClient, Instrument, LegResult, OrderSpec, RejectReason, TimeInForce};
use ethers::signers::LocalWallet;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::rest::HyperliquidRest;

/// Live `ExchangeClient` against the Hyperliquid perp/spot venue. One
/// instance targets one perp symbol and its paired spot market.
pub struct HyperliquidExchangeClient {
    rest: HyperliquidRest,
    wallet: LocalWallet,
    account_address: String,
    perp_coin: String,
    perp_asset_id: u32,
    spot_coin: String,
    spot_asset_id: u32,
    poll_interval_ms: u64,
}

impl HyperliquidExchangeClient {
    #[must_use]
    pub fn new(
        base_url: String,
        wallet: LocalWallet,
        perp_coin: String,
        perp_asset_id: u32,
        spot_coin: String,
        spot_asset_id: u32,
    ) -> Self {
        let account_address = HyperliquidRest::wallet_address(&wallet);
        Self {
            rest: HyperliquidRest::new(base_url),
            wallet,
            account_address,
            perp_coin,
            perp_asset_id,
            spot_coin,
            spot_asset_id,
            poll_interval_ms: 100,
        }
    }

    fn asset_id_for(&self, coin: &str) -> u32 {
        if coin == self.perp_coin {
            self.perp_asset_id
        } else {
            self.spot_asset_id
        }
    }

    fn tif_code(tif: TimeInForce) -> &'static str {
        match tif {
            TimeInForce::AddLiquidityOnly => "Alo",
            TimeInForce::ImmediateOrCancel => "Ioc",
        }
    }

    fn parse_order_status(entry: &serde_json::Value) -> LegResult {
        if let Some(resting) = entry.get("resting") {
            let order_id = resting
                .get("oid")
                .map(|v| v.to_string())
                .unwrap_or_default();
            return LegResult::Resting { order_id };
        }
        if let Some(filled) = entry.get("filled") {
            let size_filled = decimal_field(filled, "totalSz").unwrap_or(Decimal::ZERO);
            let avg_px = decimal_field(filled, "avgPx").unwrap_or(Decimal::ZERO);
            return LegResult::Filled {
                size_filled,
                avg_px,
            };
        }
        if let Some(err) = entry.get("error").and_then(|v| v.as_str()) {
            let reason = if err.contains("post only") || err.contains("ALO") {
                RejectReason::PostOnlyCross
            } else if err.contains("margin") {
                RejectReason::InsufficientMargin
            } else if err.contains("notional") || err.contains("size") {
                RejectReason::MinNotional
            } else {
                RejectReason::Other
            };
            return LegResult::Rejected { reason };
        }
        LegResult::Unknown
    }
}

fn decimal_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    value.get(key)?.as_str().and_then(|s| Decimal::from_str(s).ok())
}

#[async_trait]
impl ExchangeClient for HyperliquidExchangeClient {
    async fn place_order(&self, coin: &str, spec: OrderSpec) -> Result<LegResult> {
        let order = serde_json::json!({
            "a": self.asset_id_for(coin),
            "b": spec.is_buy,
            "p": spec.limit_px.to_string(),
            "s": spec.size.to_string(),
            "r": spec.reduce_only,
            "t": { "limit": { "tif": Self::tif_code(spec.tif) } },
        });
        let action = serde_json::json!({
            "type": "order",
            "orders": [order],
            "grouping": "na",
        });

        let response = self.rest.exchange(&self.wallet, action).await?;
        debug!(?coin, instrument = ?spec.instrument, "order submitted");

        if response.get("status").and_then(|v| v.as_str()) != Some("ok") {
            let err = response
                .get("response")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown exchange error");
            warn!(error = %err, "order request not ok");
            return Ok(LegResult::Rejected {
                reason: RejectReason::Other,
            });
        }

        let status = response
            .pointer("/response/data/statuses/0")
            .ok_or_else(|| anyhow!("missing order status in exchange response"))?;
        Ok(Self::parse_order_status(status))
    }

    async fn await_fill(&self, coin: &str, order_id: &str, timeout_ms: u64) -> Result<LegResult> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let status = self.query_leg(coin, order_id).await?;
            if matches!(
                status,
                LegResult::Filled { .. } | LegResult::Cancelled | LegResult::Rejected { .. }
            ) {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(LegResult::Unknown);
            }
            tokio::time::sleep(Duration::from_millis(self.poll_interval_ms)).await;
        }
    }

    async fn cancel_order(&self, coin: &str, order_id: &str) -> Result<()> {
        let oid: u64 = order_id.parse().context("order id is not numeric")?;
        let action = serde_json::json!({
            "type": "cancel",
            "cancels": [{ "a": self.asset_id_for(coin), "o": oid }],
        });
        self.rest.exchange(&self.wallet, action).await?;
        Ok(())
    }

    async fn query_leg(&self, coin: &str, order_id: &str) -> Result<LegResult> {
        let oid: u64 = order_id.parse().context("order id is not numeric")?;
        let body = serde_json::json!({
            "type": "orderStatus",
            "user": self.account_address,
            "oid": oid,
        });
        let response = self.rest.info(body).await?;
        let _ = coin;
        match response.pointer("/order/status").and_then(|v| v.as_str()) {
            Some("filled") => {
                let size_filled = decimal_field(&response, "/order/order/sz").unwrap_or(Decimal::ZERO);
                let avg_px = response
                    .pointer("/order/order/limitPx")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Decimal::from_str(s).ok())
                    .unwrap_or(Decimal::ZERO);
                Ok(LegResult::Filled {
                    size_filled,
                    avg_px,
                })
            }
            Some("canceled" | "cancelled") => Ok(LegResult::Cancelled),
            Some("open") => Ok(LegResult::Resting {
                order_id: order_id.to_string(),
            }),
            _ => Ok(LegResult::Unknown),
        }
    }

    async fn set_leverage(&self, symbol: &str, factor: u8, is_cross: bool) -> Result<()> {
        let action = serde_json::json!({
            "type": "updateLeverage",
            "asset": self.asset_id_for(symbol),
            "isCross": is_cross,
            "leverage": factor,
        });
        self.rest.exchange(&self.wallet, action).await?;
        Ok(())
    }

    async fn perp_free_usdc(&self) -> Result<Decimal> {
        let body = serde_json::json!({
            "type": "clearinghouseState",
            "user": self.account_address,
        });
        let response = self.rest.info(body).await?;
        response
            .get("withdrawable")
            .and_then(|v| v.as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| anyhow!("missing withdrawable in clearinghouse state"))
    }

    async fn spot_usdc(&self) -> Result<Decimal> {
        self.spot_balance("USDC").await
    }

    async fn spot_base_qty(&self) -> Result<Decimal> {
        let coin = self.spot_coin.clone();
        self.spot_balance(&coin).await
    }

    async fn arm_deadman(&self, seconds: u64) -> Result<()> {
        let fire_at = chrono::Utc::now().timestamp_millis() + (seconds as i64) * 1000;
        let action = serde_json::json!({
            "type": "scheduleCancel",
            "time": fire_at,
        });
        self.rest.exchange(&self.wallet, action).await?;
        Ok(())
    }

    async fn best_bid_ask(&self, coin: &str) -> Result<(Decimal, Decimal)> {
        let body = serde_json::json!({ "type": "l2Book", "coin": coin });
        let response = self.rest.info(body).await?;
        let levels = response
            .pointer("/levels")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("missing levels in l2Book response for {coin}"))?;
        let bid_px = levels
            .first()
            .and_then(|side| side.as_array())
            .and_then(|side| side.first())
            .and_then(|level| level.get("px"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing bid level in l2Book response for {coin}"))?;
        let ask_px = levels
            .get(1)
            .and_then(|side| side.as_array())
            .and_then(|side| side.first())
            .and_then(|level| level.get("px"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("missing ask level in l2Book response for {coin}"))?;
        Ok((
            Decimal::from_str(bid_px).context("parsing l2Book bid price")?,
            Decimal::from_str(ask_px).context("parsing l2Book ask price")?,
        ))
    }
}

impl HyperliquidExchangeClient {
    async fn spot_balance(&self, coin: &str) -> Result<Decimal> {
        let body = serde_json::json!({
            "type": "spotClearinghouseState",
            "user": self.account_address,
        });
        let response = self.rest.info(body).await?;
        let balances = response
            .get("balances")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow!("missing balances in spot clearinghouse state"))?;
        for balance in balances {
            if balance.get("coin").and_then(|v| v.as_str()) == Some(coin) {
                return decimal_field(balance, "total")
                    .ok_or_else(|| anyhow!("balance entry for {coin} has no parseable total"));
            }
        }
        Ok(Decimal::ZERO)
    }

    #[must_use]
    pub const fn instrument_coin(&self, instrument: Instrument) -> &str {
        match instrument {
            Instrument::Perp => &self.perp_coin,
            Instrument::Spot => &self.spot_coin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tif_code_maps_correctly() {
        assert_eq!(
            HyperliquidExchangeClient::tif_code(TimeInForce::AddLiquidityOnly),
            "Alo"
        );
        assert_eq!(
            HyperliquidExchangeClient::tif_code(TimeInForce::ImmediateOrCancel),
            "Ioc"
        );
    }

    #[test]
    fn parse_order_status_resting() {
        let v = serde_json::json!({ "resting": { "oid": 42 } });
        assert!(matches!(
            HyperliquidExchangeClient::parse_order_status(&v),
            LegResult::Resting { order_id } if order_id == "42"
        ));
    }

    #[test]
    fn parse_order_status_filled() {
        let v = serde_json::json!({ "filled": { "totalSz": "1.5", "avgPx": "100.25" } });
        match HyperliquidExchangeClient::parse_order_status(&v) {
            LegResult::Filled { size_filled, avg_px } => {
                assert_eq!(size_filled, Decimal::from_str("1.5").unwrap());
                assert_eq!(avg_px, Decimal::from_str("100.25").unwrap());
            }
            other => panic!("expected Filled, got {other:?}"),
        }
    }

    #[test]
    fn parse_order_status_rejected_post_only() {
        let v = serde_json::json!({ "error": "could not immediately match against any resting post only ALO order" });
        assert!(matches!(
            HyperliquidExchangeClient::parse_order_status(&v),
            LegResult::Rejected { reason: RejectReason::PostOnlyCross }
        ));
    }

    #[test]
    fn parse_order_status_unknown_on_empty_entry() {
        let v = serde_json::json!({});
        assert_eq!(HyperliquidExchangeClient::parse_order_status(&v), LegResult::Unknown);
    }
}
