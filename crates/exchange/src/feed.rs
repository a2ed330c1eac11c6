use anyhow::{anyhow, Result};
use async_trait::async_trait;
use basis_core::{FeedError, Tick, TickSource};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::websocket::HyperliquidWebSocket;

#[derive(Debug, Clone, Copy)]
enum Side {
    Perp,
    Spot,
}

#[derive(Debug, Clone, Copy)]
struct BookUpdate {
    side: Side,
    bid: Decimal,
    ask: Decimal,
    recv_ms: i64,
}

/// Merges perp and spot top-of-book subscriptions into a single `Tick`
/// stream. Each side runs its own reconnect loop with exponential backoff
/// (100ms doubling to a 5s cap); the merge keeps the freshest snapshot of
/// each side and emits a new `Tick` whenever either side updates, once both
/// sides have been seen at least once.
pub struct MarketFeed {
    rx: mpsc::Receiver<BookUpdate>,
    _perp_task: JoinHandle<()>,
    _spot_task: JoinHandle<()>,
    perp: Option<(Decimal, Decimal)>,
    spot: Option<(Decimal, Decimal)>,
    last_perp_update_ms: i64,
    last_spot_update_ms: i64,
    stale_threshold_ms: i64,
}

impl MarketFeed {
    #[must_use]
    pub fn spawn(ws_url: String, perp_coin: String, spot_coin: String, stale_threshold_ms: i64) -> Self {
        let (tx, rx) = mpsc::channel(256);

        let perp_tx = tx.clone();
        let perp_url = ws_url.clone();
        let perp_coin_clone = perp_coin.clone();
        let perp_task = tokio::spawn(async move {
            run_subscription(perp_url, Side::Perp, perp_coin_clone, perp_tx).await;
        });

        let spot_tx = tx;
        let spot_url = ws_url;
        let spot_task = tokio::spawn(async move {
            run_subscription(spot_url, Side::Spot, spot_coin, spot_tx).await;
        });

        let now = chrono::Utc::now().timestamp_millis();
        Self {
            rx,
            _perp_task: perp_task,
            _spot_task: spot_task,
            perp: None,
            spot: None,
            last_perp_update_ms: now,
            last_spot_update_ms: now,
            stale_threshold_ms,
        }
    }

    /// Milliseconds since the last update on the slower of the two legs, for
    /// the orchestrator to forward into `StabilityGate::set_feed_stale`.
    #[must_use]
    pub fn age_ms(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        (now - self.last_perp_update_ms).max(now - self.last_spot_update_ms)
    }

    /// A subscription gap exceeding the threshold on either leg individually
    /// is stale, even while the other leg keeps ticking.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        now - self.last_perp_update_ms > self.stale_threshold_ms
            || now - self.last_spot_update_ms > self.stale_threshold_ms
    }
}

#[async_trait]
impl TickSource for MarketFeed {
    async fn next_tick(&mut self) -> Result<Tick> {
        loop {
            let update = self
                .rx
                .recv()
                .await
                .ok_or_else(|| anyhow!(FeedError::Subscription("feed task channel closed".into())))?;

            let now = chrono::Utc::now().timestamp_millis();
            match update.side {
                Side::Perp => {
                    self.perp = Some((update.bid, update.ask));
                    self.last_perp_update_ms = now;
                }
                Side::Spot => {
                    self.spot = Some((update.bid, update.ask));
                    self.last_spot_update_ms = now;
                }
            }

            // Drain any further immediately-available updates so the tick we
            // emit reflects the freshest state of both books, not a stale
            // interleaving.
            while let Ok(more) = self.rx.try_recv() {
                let now = chrono::Utc::now().timestamp_millis();
                match more.side {
                    Side::Perp => {
                        self.perp = Some((more.bid, more.ask));
                        self.last_perp_update_ms = now;
                    }
                    Side::Spot => {
                        self.spot = Some((more.bid, more.ask));
                        self.last_spot_update_ms = now;
                    }
                }
            }

            let (Some((perp_bid, perp_ask)), Some((spot_bid, spot_ask))) = (self.perp, self.spot) else {
                continue;
            };

            let tick = Tick {
                perp_bid,
                perp_ask,
                spot_bid,
                spot_ask,
                recv_ms: update.recv_ms,
                send_ms: None,
            };

            if tick.is_crossed() {
                warn!(?tick, "crossed book observed, emitting anyway for the gate to reject");
            }

            return Ok(tick);
        }
    }
}

async fn run_subscription(ws_url: String, side: Side, coin: String, tx: mpsc::Sender<BookUpdate>) {
    let mut backoff_ms: u64 = 100;
    const MAX_BACKOFF_MS: u64 = 5_000;

    loop {
        let mut ws = HyperliquidWebSocket::new(ws_url.clone());
        if let Err(err) = ws.connect().await {
            error!(?side, error = %err, "book subscription connect failed, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            continue;
        }

        let subscribe = serde_json::json!({
            "method": "subscribe",
            "subscription": { "type": "l2Book", "coin": coin },
        });
        if let Err(err) = ws.subscribe(subscribe).await {
            error!(?side, error = %err, "book subscription request failed, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            continue;
        }

        info!(?side, %coin, "book subscription established");
        backoff_ms = 100;

        loop {
            match ws.next_message().await {
                Ok(Some(msg)) => {
                    if let Some(update) = parse_l2_book(&msg, side) {
                        if tx.send(update).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(?side, error = %err, "book subscription dropped, reconnecting");
                    break;
                }
            }
        }
    }
}

fn parse_l2_book(msg: &serde_json::Value, side: Side) -> Option<BookUpdate> {
    if msg.get("channel").and_then(|v| v.as_str()) != Some("l2Book") {
        return None;
    }
    let levels = msg.pointer("/data/levels")?.as_array()?;
    let bid_px = levels.first()?.as_array()?.first()?.get("px")?.as_str()?;
    let ask_px = levels.get(1)?.as_array()?.first()?.get("px")?.as_str()?;
    Some(BookUpdate {
        side,
        bid: Decimal::from_str(bid_px).ok()?,
        ask: Decimal::from_str(ask_px).ok()?,
        recv_ms: chrono::Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_well_formed_l2_book_message() {
        let msg = serde_json::json!({
            "channel": "l2Book",
            "data": {
                "levels": [
                    [{ "px": "100.5", "sz": "2.0" }],
                    [{ "px": "100.6", "sz": "1.5" }],
                ]
            }
        });
        let update = parse_l2_book(&msg, Side::Perp).unwrap();
        assert_eq!(update.bid, dec!(100.5));
        assert_eq!(update.ask, dec!(100.6));
    }

    #[test]
    fn ignores_non_book_channel_messages() {
        let msg = serde_json::json!({ "channel": "subscriptionResponse" });
        assert!(parse_l2_book(&msg, Side::Perp).is_none());
    }

    #[test]
    fn ignores_malformed_level_entries() {
        let msg = serde_json::json!({
            "channel": "l2Book",
            "data": { "levels": [[], []] }
        });
        assert!(parse_l2_book(&msg, Side::Spot).is_none());
    }

    #[tokio::test]
    async fn a_single_dead_leg_is_stale_even_while_the_other_leg_keeps_ticking() {
        let (_tx, rx) = mpsc::channel(1);
        let now = chrono::Utc::now().timestamp_millis();
        let feed = MarketFeed {
            rx,
            _perp_task: tokio::spawn(async {}),
            _spot_task: tokio::spawn(async {}),
            perp: Some((dec!(100), dec!(100.1))),
            spot: Some((dec!(99.9), dec!(100))),
            last_perp_update_ms: now - 5_000,
            last_spot_update_ms: now,
            stale_threshold_ms: 2_000,
        };
        assert!(
            feed.is_stale(),
            "a stale perp leg must flag the feed even though spot just ticked"
        );
    }

    #[tokio::test]
    async fn both_legs_fresh_is_not_stale() {
        let (_tx, rx) = mpsc::channel(1);
        let now = chrono::Utc::now().timestamp_millis();
        let feed = MarketFeed {
            rx,
            _perp_task: tokio::spawn(async {}),
            _spot_task: tokio::spawn(async {}),
            perp: Some((dec!(100), dec!(100.1))),
            spot: Some((dec!(99.9), dec!(100))),
            last_perp_update_ms: now,
            last_spot_update_ms: now,
            stale_threshold_ms: 2_000,
        };
        assert!(!feed.is_stale());
    }
}
