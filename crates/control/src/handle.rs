//! Bundles every component the control surface needs a handle to: the
//! engine's hot-path pieces (gate, dispatcher, position manager, capital
//! guard, exchange client), the runtime knobs it can mutate, and the
//! persistence repositories the read-only commands query.

use std::sync::Arc;
use std::time::Instant;

use basis_core::{BotEvent, ExchangeClient};
use basis_engine::{CapitalGuard, OrderDispatcher, PositionManager, StabilityGate};
use basis_persistence::Repositories;
use tokio::sync::broadcast;

use crate::settings::RuntimeSettings;

/// Shared state injected into every control-surface handler. Cloning is
/// cheap: every field is an `Arc` or `Copy` value.
#[derive(Clone)]
pub struct EngineHandle {
    pub pair_base: String,
    pub gate: Arc<StabilityGate>,
    pub dispatcher: Arc<OrderDispatcher>,
    pub positions: Arc<PositionManager>,
    pub capital: Arc<CapitalGuard>,
    pub exchange: Arc<dyn ExchangeClient>,
    pub settings: Arc<RuntimeSettings>,
    pub repos: Option<Arc<Repositories>>,
    pub events: broadcast::Sender<BotEvent>,
    pub started_at: Arc<Instant>,
}

impl EngineHandle {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair_base: String,
        gate: Arc<StabilityGate>,
        dispatcher: Arc<OrderDispatcher>,
        positions: Arc<PositionManager>,
        capital: Arc<CapitalGuard>,
        exchange: Arc<dyn ExchangeClient>,
        settings: Arc<RuntimeSettings>,
        repos: Option<Arc<Repositories>>,
        events: broadcast::Sender<BotEvent>,
    ) -> Self {
        Self {
            pair_base,
            gate,
            dispatcher,
            positions,
            capital,
            exchange,
            settings,
            repos,
            events,
            started_at: Arc::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
