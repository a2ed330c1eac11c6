use std::collections::HashMap;
use std::sync::Arc;

use basis_core::{BotEvent, DispatchError, HedgedPosition, Notification, PositionStatus, Severity};
use basis_persistence::{PositionRecord, Repositories, TradeRecord, TradeRole};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatcher::OrderDispatcher;
use crate::gate::StabilityGate;

/// Static configuration for close-trigger evaluation. See spec §4.6.
#[derive(Debug, Clone, Copy)]
pub struct PositionManagerConfig {
    pub max_hold_ms: i64,
    pub close_threshold_bps: Decimal,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            max_hold_ms: 60_000,
            close_threshold_bps: Decimal::ZERO,
        }
    }
}

/// Reason a position was selected for closure, recorded on the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    MaxHold,
    EdgeDecay,
    Operator,
}

impl CloseTrigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::MaxHold => "max_hold_timeout",
            Self::EdgeDecay => "edge_decay",
            Self::Operator => "operator_request",
        }
    }
}

/// Owns the set of open `HedgedPosition` records and their close lifecycle.
/// See spec §4.6: on every tick it checks each open position for a hard
/// timeout, a favourable reverse-edge decay, or an explicit operator
/// request, then invokes the dispatcher in close mode.
pub struct PositionManager {
    dispatcher: Arc<OrderDispatcher>,
    gate: Arc<StabilityGate>,
    config: PositionManagerConfig,
    positions: Mutex<HashMap<Uuid, HedgedPosition>>,
    close_requests: Mutex<Vec<Uuid>>,
    events: broadcast::Sender<BotEvent>,
    pair_base: String,
    repos: Option<Arc<Repositories>>,
}

impl PositionManager {
    #[must_use]
    pub fn new(
        dispatcher: Arc<OrderDispatcher>,
        gate: Arc<StabilityGate>,
        config: PositionManagerConfig,
        events: broadcast::Sender<BotEvent>,
        pair_base: String,
        repos: Option<Arc<Repositories>>,
    ) -> Self {
        Self {
            dispatcher,
            gate,
            config,
            positions: Mutex::new(HashMap::new()),
            close_requests: Mutex::new(Vec::new()),
            events,
            pair_base,
            repos,
        }
    }

    /// Registers a freshly opened position, handed back by the dispatcher,
    /// and synchronously persists its `Open` row (§6: position lifecycle
    /// writes are synchronous, not batched like ticks/edges).
    pub async fn track(&self, position: HedgedPosition) {
        let id = position.id;
        self.positions.lock().insert(id, position.clone());
        if let Some(repos) = &self.repos {
            let record = PositionRecord::from(&position);
            if let Err(e) = repos.positions.upsert(&record).await {
                warn!(position_id = %id, error = %e, "failed to persist opened position, continuing");
            }
            let trade = TradeRecord::new(
                &self.pair_base,
                position.direction.as_str(),
                self.gate.threshold_bps(),
                position.open_edge_bps,
                position.notional_usd,
                TradeRole::Open,
                json!({"direction": position.direction.as_str(), "notional_usd": position.notional_usd}),
                Some(json!({
                    "perp_size": position.perp_size,
                    "spot_size": position.spot_size,
                })),
                "filled",
            );
            if let Err(e) = repos.trades.insert(&trade).await {
                warn!(position_id = %id, error = %e, "failed to persist open trade record, continuing");
            }
        }
        let _ = self.events.send(BotEvent::PositionOpened(position));
        info!(position_id = %id, "position manager now tracking open position");
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.positions
            .lock()
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .count()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<HedgedPosition> {
        self.positions.lock().values().cloned().collect()
    }

    /// Marks a position for closure at the operator's request; taken on the
    /// next `on_tick` pass. Used by the control surface's `close-all`.
    pub fn request_close(&self, id: Uuid) {
        self.close_requests.lock().push(id);
    }

    pub fn request_close_all(&self) {
        let ids: Vec<Uuid> = self
            .positions
            .lock()
            .iter()
            .filter(|(_, p)| p.status == PositionStatus::Open)
            .map(|(id, _)| *id)
            .collect();
        self.close_requests.lock().extend(ids);
    }

    /// Evaluates every open position's closure conditions and, for each one
    /// that qualifies, invokes the dispatcher in close mode. Reverse-edge
    /// decay uses whichever of `reverse_edge_ps_bps`/`reverse_edge_sp_bps`
    /// corresponds to the position's close direction (computed by the
    /// caller from the latest `Edge`).
    pub async fn on_tick(
        &self,
        tick: &basis_core::Tick,
        reverse_edge_bps_for: impl Fn(basis_core::Direction) -> Decimal,
        now: DateTime<Utc>,
    ) {
        let due: Vec<(Uuid, CloseTrigger)> = {
            let positions = self.positions.lock();
            let requested: std::collections::HashSet<Uuid> =
                self.close_requests.lock().drain(..).collect();
            positions
                .values()
                .filter(|p| p.status == PositionStatus::Open)
                .filter_map(|p| {
                    if requested.contains(&p.id) {
                        return Some((p.id, CloseTrigger::Operator));
                    }
                    if now - p.opened_at >= Duration::milliseconds(self.config.max_hold_ms) {
                        return Some((p.id, CloseTrigger::MaxHold));
                    }
                    let reverse_edge = reverse_edge_bps_for(p.direction.opposite());
                    if reverse_edge >= self.config.close_threshold_bps {
                        return Some((p.id, CloseTrigger::EdgeDecay));
                    }
                    None
                })
                .collect()
        };

        for (id, trigger) in due {
            self.close_one(id, trigger, tick, now).await;
        }
    }

    async fn close_one(
        &self,
        id: Uuid,
        trigger: CloseTrigger,
        tick: &basis_core::Tick,
        now: DateTime<Utc>,
    ) {
        let Some(mut position) = self.positions.lock().get(&id).cloned() else {
            return;
        };
        position.status = PositionStatus::Closing;
        self.positions.lock().insert(id, position.clone());
        info!(position_id = %id, trigger = trigger.as_str(), "closing hedged position");

        match self.dispatcher.close(&position, tick).await {
            Ok(close_pnl) => {
                position.status = PositionStatus::Closed;
                position.realized_pnl_usd = Some(close_pnl.realized_pnl_usd);
                position.closed_at = Some(now);
                self.positions.lock().insert(id, position.clone());
                self.gate.on_dispatch_terminal();
                let notification = Notification {
                    ts: now,
                    severity: Severity::Info,
                    position_id: Some(id),
                    direction: Some(position.direction),
                    notional_usd: Some(position.notional_usd),
                    pnl_usd: Some(close_pnl.realized_pnl_usd),
                    message: format!(
                        "position closed via {}: realized pnl {} usd",
                        trigger.as_str(),
                        close_pnl.realized_pnl_usd
                    ),
                    error_code: None,
                };
                let _ = self.events.send(BotEvent::Notification(notification));
                let _ = self.events.send(BotEvent::PositionClosed(position.clone()));
                self.persist_close(&position, TradeRole::Close, "filled").await;
            }
            Err(DispatchError::BrokenHedge {
                exposure_size,
                flatten_error,
                ..
            }) => {
                position.status = PositionStatus::Broken;
                self.positions.lock().insert(id, position.clone());
                self.gate.on_dispatch_terminal();
                self.gate.set_paused(true);
                error!(position_id = %id, exposure_size = %exposure_size, error = %flatten_error, "broken hedge on close: auto-pausing new entries, manual review required");
                let notification = Notification {
                    ts: now,
                    severity: Severity::Critical,
                    position_id: Some(id),
                    direction: Some(position.direction),
                    notional_usd: Some(position.notional_usd),
                    pnl_usd: None,
                    message: format!(
                        "broken hedge closing position: exposure {exposure_size} left unhedged, flatten failed: {flatten_error}"
                    ),
                    error_code: Some("BROKEN_HEDGE".to_string()),
                };
                let _ = self.events.send(BotEvent::Notification(notification));
                self.persist_close(&position, TradeRole::RecoveryFlatten, "broken").await;
            }
            Err(other) => {
                // Close attempt itself produced no state change (e.g. NoFill)
                // or was recovered back to roughly the original exposure
                // (PartialRecovered); leave the position Open so the next
                // tick retries. A maker-timeout-then-IOC attempt already
                // happened inside `dispatcher.close`, so this path means
                // genuine exchange trouble, not a routine ALO rejection.
                position.status = PositionStatus::Open;
                self.positions.lock().insert(id, position.clone());
                warn!(position_id = %id, error = %other, "close attempt failed, will retry next tick");

                let error_code = match &other {
                    DispatchError::PartialRecovered { .. } => "CLOSE_PARTIAL_RECOVERED",
                    DispatchError::NoFill => "CLOSE_NO_FILL",
                    _ => "CLOSE_FAILED",
                };
                let notification = Notification {
                    ts: now,
                    severity: Severity::Warning,
                    position_id: Some(id),
                    direction: Some(position.direction),
                    notional_usd: Some(position.notional_usd),
                    pnl_usd: None,
                    message: format!(
                        "close attempt failed on trigger {}: {other}, position remains open and will retry",
                        trigger.as_str()
                    ),
                    error_code: Some(error_code.to_string()),
                };
                let _ = self.events.send(BotEvent::Notification(notification));

                if let Some(repos) = &self.repos {
                    let (role, status) = match &other {
                        DispatchError::PartialRecovered { .. } => (TradeRole::IocFallback, "partial_recovered"),
                        _ => (TradeRole::Close, "no_fill"),
                    };
                    let trade = TradeRecord::new(
                        &self.pair_base,
                        position.direction.opposite().as_str(),
                        self.gate.threshold_bps(),
                        position.open_edge_bps,
                        position.notional_usd,
                        role,
                        json!({"direction": position.direction.opposite().as_str(), "notional_usd": position.notional_usd}),
                        Some(json!({"error": other.to_string()})),
                        status,
                    );
                    if let Err(e) = repos.trades.insert(&trade).await {
                        warn!(position_id = %id, error = %e, "failed to persist close-failure trade record, continuing");
                    }
                }
            }
        }
    }

    /// Synchronously upserts the position's terminal row and writes a
    /// closing trade record. Failures degrade to best-effort logging
    /// (§7: `PersistenceError` never blocks the trading path).
    async fn persist_close(&self, position: &HedgedPosition, role: TradeRole, status: &str) {
        let Some(repos) = &self.repos else { return };
        let record = PositionRecord::from(position);
        if let Err(e) = repos.positions.upsert(&record).await {
            warn!(position_id = %position.id, error = %e, "failed to persist closed position, continuing");
        }
        let trade = TradeRecord::new(
            &self.pair_base,
            position.direction.opposite().as_str(),
            self.gate.threshold_bps(),
            position.open_edge_bps,
            position.notional_usd,
            role,
            json!({"direction": position.direction.opposite().as_str(), "notional_usd": position.notional_usd}),
            Some(json!({
                "realized_pnl_usd": position.realized_pnl_usd,
                "perp_size": position.perp_size,
                "spot_size": position.spot_size,
            })),
            status,
        );
        if let Err(e) = repos.trades.insert(&trade).await {
            warn!(position_id = %position.id, error = %e, "failed to persist close trade record, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use async_trait::async_trait;
    use basis_core::{Direction, ExchangeClient, LegResult, OrderSpec, Tick};
    use rust_decimal_macros::dec;

    struct AlwaysFillExchange;

    #[async_trait]
    impl ExchangeClient for AlwaysFillExchange {
        async fn place_order(&self, _coin: &str, spec: OrderSpec) -> anyhow::Result<LegResult> {
            Ok(LegResult::Filled {
                size_filled: spec.size,
                avg_px: spec.limit_px,
            })
        }
        async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
            unreachable!()
        }
        async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
            unreachable!()
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
            Ok((dec!(50), dec!(50)))
        }
    }

    fn tick() -> Tick {
        Tick {
            perp_bid: dec!(50.00),
            perp_ask: dec!(50.01),
            spot_bid: dec!(49.99),
            spot_ask: dec!(50.00),
            recv_ms: 0,
            send_ms: None,
        }
    }

    fn manager() -> PositionManager {
        let dispatcher = Arc::new(OrderDispatcher::new(
            Arc::new(AlwaysFillExchange),
            DispatcherConfig::default(),
        ));
        let gate = Arc::new(StabilityGate::new(
            dec!(20),
            1000,
            2000,
            3,
            Arc::new(crate::gate::RateLimiter::new()),
        ));
        let (tx, _rx) = broadcast::channel(16);
        PositionManager::new(
            dispatcher,
            gate,
            PositionManagerConfig::default(),
            tx,
            "BTC".to_string(),
            None,
        )
    }

    fn open_position(opened_at: DateTime<Utc>) -> HedgedPosition {
        HedgedPosition {
            id: Uuid::new_v4(),
            direction: Direction::PerpToSpot,
            opened_at,
            notional_usd: dec!(12),
            perp_size: dec!(0.72),
            spot_size: dec!(0.72),
            open_edge_bps: dec!(20),
            status: PositionStatus::Open,
            realized_pnl_usd: None,
            closed_at: None,
        }
    }

    #[tokio::test]
    async fn closes_on_max_hold_timeout() {
        let pm = manager();
        let opened_at = Utc::now() - Duration::milliseconds(61_000);
        let position = open_position(opened_at);
        let id = position.id;
        pm.track(position).await;
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
        assert!(p.realized_pnl_usd.is_some());
    }

    #[tokio::test]
    async fn does_not_close_before_max_hold_without_edge_decay() {
        let pm = manager();
        let position = open_position(Utc::now());
        let id = position.id;
        pm.track(position).await;
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn closes_on_favourable_edge_decay() {
        let pm = manager();
        let position = open_position(Utc::now());
        let id = position.id;
        pm.track(position).await;
        // close_threshold_bps default is 0; reverse edge >= 0 triggers close
        pm.on_tick(&tick(), |_| dec!(1), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn operator_close_request_is_honoured() {
        let pm = manager();
        let position = open_position(Utc::now());
        let id = position.id;
        pm.track(position).await;
        pm.request_close(id);
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn close_no_fill_sends_a_notification_and_stays_open() {
        struct NeverFillExchange;
        #[async_trait]
        impl ExchangeClient for NeverFillExchange {
            async fn place_order(&self, _coin: &str, _spec: OrderSpec) -> anyhow::Result<LegResult> {
                Ok(LegResult::Rejected {
                    reason: basis_core::RejectReason::Other,
                })
            }
            async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
                unreachable!()
            }
            async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
                unreachable!()
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
                Ok((dec!(50), dec!(50)))
            }
        }

        let dispatcher = Arc::new(OrderDispatcher::new(
            Arc::new(NeverFillExchange),
            DispatcherConfig::default(),
        ));
        let gate = Arc::new(StabilityGate::new(
            dec!(20),
            1000,
            2000,
            3,
            Arc::new(crate::gate::RateLimiter::new()),
        ));
        let (tx, mut rx) = broadcast::channel(16);
        let pm = PositionManager::new(
            dispatcher,
            gate,
            PositionManagerConfig::default(),
            tx,
            "BTC".to_string(),
            None,
        );
        let opened_at = Utc::now() - Duration::milliseconds(61_000);
        let position = open_position(opened_at);
        let id = position.id;
        pm.track(position).await;
        let _ = rx.recv().await; // drain the PositionOpened event
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;

        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Open, "close failure must leave the position open for retry");

        let event = rx.recv().await.unwrap();
        assert!(
            matches!(event, BotEvent::Notification(n) if n.position_id == Some(id) && n.error_code.as_deref() == Some("CLOSE_NO_FILL")),
            "a close failure must still produce exactly one operator notification"
        );
    }

    #[tokio::test]
    async fn broken_hedge_on_close_auto_pauses_the_gate() {
        struct FlattenFailsExchange;
        #[async_trait]
        impl ExchangeClient for FlattenFailsExchange {
            async fn place_order(&self, _coin: &str, spec: OrderSpec) -> anyhow::Result<LegResult> {
                // Only the initial maker perp leg fills; the maker spot leg,
                // every IOC fallback attempt, and the later flatten attempt
                // (also IOC) all reject, so the partial fill is unrecoverable.
                if spec.instrument == basis_core::Instrument::Perp
                    && spec.tif == basis_core::TimeInForce::AddLiquidityOnly
                {
                    Ok(LegResult::Filled {
                        size_filled: spec.size,
                        avg_px: spec.limit_px,
                    })
                } else {
                    Ok(LegResult::Rejected {
                        reason: basis_core::RejectReason::Other,
                    })
                }
            }
            async fn await_fill(&self, _coin: &str, _order_id: &str, _timeout_ms: u64) -> anyhow::Result<LegResult> {
                unreachable!()
            }
            async fn cancel_order(&self, _coin: &str, _order_id: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn query_leg(&self, _coin: &str, _order_id: &str) -> anyhow::Result<LegResult> {
                unreachable!()
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
                Ok((dec!(50), dec!(50)))
            }
        }

        let dispatcher = Arc::new(OrderDispatcher::new(
            Arc::new(FlattenFailsExchange),
            DispatcherConfig::default(),
        ));
        let gate = Arc::new(StabilityGate::new(
            dec!(20),
            1000,
            2000,
            3,
            Arc::new(crate::gate::RateLimiter::new()),
        ));
        let (tx, _rx) = broadcast::channel(16);
        let pm = PositionManager::new(
            dispatcher,
            Arc::clone(&gate),
            PositionManagerConfig::default(),
            tx,
            "BTC".to_string(),
            None,
        );
        let opened_at = Utc::now() - Duration::milliseconds(61_000);
        let position = open_position(opened_at);
        let id = position.id;
        pm.track(position).await;
        assert!(!gate.is_paused());
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert_eq!(p.status, PositionStatus::Broken);
        assert!(gate.is_paused(), "kill-switch must auto-set on broken hedge");
    }

    #[tokio::test]
    async fn every_position_reaches_terminal_state_within_deadline() {
        let pm = manager();
        let opened_at = Utc::now() - Duration::milliseconds(61_000);
        let position = open_position(opened_at);
        let id = position.id;
        pm.track(position).await;
        pm.on_tick(&tick(), |_| dec!(-100), Utc::now()).await;
        let snap = pm.snapshot();
        let p = snap.iter().find(|p| p.id == id).unwrap();
        assert!(matches!(p.status, PositionStatus::Closed | PositionStatus::Broken));
    }
}
