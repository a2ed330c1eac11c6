use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use basis_control::{ControlServer, EngineHandle, RuntimeSettings};
use basis_core::{
    BotEvent, ConfigLoader, EngineConfig, ExchangeClient, FeeSchedule, Notification, Severity,
    TickSource,
};
use basis_engine::{
    CapitalGuard, DispatcherConfig, EdgeCalculator, OpportunityTracker, OrderDispatcher,
    PositionManager, PositionManagerConfig, PriceContext, RateLimiter, StabilityGate,
};
use basis_exchange::{HyperliquidExchangeClient, MarketFeed, SimulatedExchangeClient};
use basis_persistence::{
    EdgeBatcher, EdgeRecord, OpportunityRecord, OpportunitySink, Repositories, TradeRecord,
    TradeRole,
};
use clap::Parser;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Runs the perp/spot basis arbitrage engine: subscribes to the merged
/// order book feed, arms and fires on sustained edges, and exposes an
/// operator control surface over HTTP and websocket.
#[derive(Parser, Debug)]
#[command(name = "basis-arb", about = "Perp/spot basis arbitrage execution engine", long_about = None)]
struct Cli {
    /// Hyperliquid REST/websocket base URL.
    #[arg(long, env = "HYPERLIQUID_API_URL", default_value = "https://api.hyperliquid.xyz")]
    api_url: String,

    /// Hyperliquid websocket URL, derived from `api_url` if not given.
    #[arg(long, env = "HYPERLIQUID_WS_URL")]
    ws_url: Option<String>,

    /// Perp symbol, e.g. "BTC".
    #[arg(long, env = "PERP_COIN")]
    perp_coin: String,

    /// Hyperliquid perp asset id.
    #[arg(long, env = "PERP_ASSET_ID")]
    perp_asset_id: u32,

    /// Spot market symbol as reported over the book feed, e.g. "BTC-SPOT".
    #[arg(long, env = "SPOT_COIN")]
    spot_coin: String,

    /// Hyperliquid spot asset id (`10000 + spot_index` on the wire).
    #[arg(long, env = "SPOT_ASSET_ID")]
    spot_asset_id: u32,

    /// Smallest order size increment for both legs.
    #[arg(long, env = "LOT_STEP", default_value = "0.001")]
    lot_step: Decimal,

    /// Minimum notional per dispatch, below which a fill attempt is refused.
    #[arg(long, env = "MIN_NOTIONAL_USD", default_value = "10")]
    min_notional_usd: Decimal,

    /// Round-trip taker fee schedule, in basis points.
    #[arg(long, env = "PERP_TAKER_BPS", default_value = "3.5")]
    perp_taker_bps: Decimal,
    #[arg(long, env = "SPOT_TAKER_BPS", default_value = "7")]
    spot_taker_bps: Decimal,
    #[arg(long, env = "PERP_MAKER_BPS", default_value = "1")]
    perp_maker_bps: Decimal,
    #[arg(long, env = "SPOT_MAKER_BPS", default_value = "4")]
    spot_maker_bps: Decimal,

    /// Starting simulated balances, used only when `dry_run` is set.
    #[arg(long, env = "SIM_PERP_USDC", default_value = "10000")]
    sim_perp_usdc: Decimal,
    #[arg(long, env = "SIM_SPOT_USDC", default_value = "10000")]
    sim_spot_usdc: Decimal,
    #[arg(long, env = "SIM_SPOT_BASE_QTY", default_value = "0")]
    sim_spot_base_qty: Decimal,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::load().context("loading engine configuration")?;

    run(cli, config).await
}

async fn run(cli: Cli, config: EngineConfig) -> Result<()> {
    info!(pair = %config.pair_base, dry_run = config.dry_run, "starting basis arbitrage engine");

    let fees = FeeSchedule {
        perp_taker_bps: cli.perp_taker_bps,
        spot_taker_bps: cli.spot_taker_bps,
        perp_maker_bps: cli.perp_maker_bps,
        spot_maker_bps: cli.spot_maker_bps,
    };

    let exchange: Arc<dyn ExchangeClient> = if config.dry_run {
        info!("dry run enabled: orders are routed to the in-process simulator, book data stays live");
        Arc::new(SimulatedExchangeClient::new(
            cli.sim_perp_usdc,
            cli.sim_spot_usdc,
            cli.sim_spot_base_qty,
        ))
    } else {
        let wallet = basis_exchange::wallet::load_wallet_from_env()
            .context("loading signing wallet for live trading")?;
        Arc::new(HyperliquidExchangeClient::new(
            cli.api_url.clone(),
            wallet,
            cli.perp_coin.clone(),
            cli.perp_asset_id,
            cli.spot_coin.clone(),
            cli.spot_asset_id,
        ))
    };
    exchange
        .set_leverage(&cli.perp_coin, config.leverage, true)
        .await
        .context("setting initial perp leverage")?;
    exchange
        .arm_deadman(config.deadman_seconds)
        .await
        .context("arming exchange-side deadman switch")?;

    let (events_tx, _events_rx) = broadcast::channel::<BotEvent>(1024);

    let rate_limiter = Arc::new(RateLimiter::new());
    let gate = Arc::new(StabilityGate::new(
        config.threshold_bps,
        config.dwell_ms,
        config.cool_down_ms,
        config.max_trades_per_min_per_pair,
        rate_limiter,
    ));
    let capital = Arc::new(CapitalGuard::new(exchange.clone()));
    let dispatcher = Arc::new(OrderDispatcher::new(
        exchange.clone(),
        DispatcherConfig {
            perp_coin: cli.perp_coin.clone(),
            spot_coin: cli.spot_coin.clone(),
            leverage: config.leverage,
            lot_step: cli.lot_step,
            min_notional_usd: cli.min_notional_usd,
            alo_open_timeout_ms: config.alo_open_timeout_ms,
            alo_close_timeout_ms: config.alo_close_timeout_ms,
            slippage_bps: config.spike_extra_bps_for_ioc,
            deadman_seconds: config.deadman_seconds,
        },
    ));
    let repos = if config.database.url.is_empty() {
        None
    } else {
        match Repositories::connect(&config.database.url).await {
            Ok(repos) => Some(Arc::new(repos)),
            Err(err) => {
                warn!(error = %err, "could not connect to persistence database, running without it");
                None
            }
        }
    };
    let positions = Arc::new(PositionManager::new(
        dispatcher.clone(),
        gate.clone(),
        PositionManagerConfig {
            max_hold_ms: config.max_hold_ms,
            close_threshold_bps: config.close_threshold_bps,
        },
        events_tx.clone(),
        config.pair_base.clone(),
        repos.clone(),
    ));

    let edge_batcher = repos.as_ref().map(|r| EdgeBatcher::spawn(r.edges.clone()));
    let opportunity_sink = repos.as_ref().map(|r| OpportunitySink::spawn(r.opportunities.clone()));

    let settings = Arc::new(RuntimeSettings::new(config.alloc_per_trade_usd, config.dry_run));
    let handle = EngineHandle::new(
        config.pair_base.clone(),
        gate.clone(),
        dispatcher.clone(),
        positions.clone(),
        capital.clone(),
        exchange.clone(),
        settings.clone(),
        repos.clone(),
        events_tx.clone(),
    );

    let control_addr = format!("{}:{}", config.server.host, config.server.port);
    let control_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(err) = ControlServer::new(control_handle).serve(&control_addr).await {
            error!(error = %err, "control surface exited");
        }
    });

    let ws_url = cli
        .ws_url
        .clone()
        .unwrap_or_else(|| cli.api_url.replacen("https://", "wss://", 1) + "/ws");
    let feed = MarketFeed::spawn(
        ws_url,
        cli.perp_coin.clone(),
        cli.spot_coin.clone(),
        Duration::from_secs(config.deadman_seconds).as_millis() as i64,
    );

    let last_tick: Arc<Mutex<Option<basis_core::Tick>>> = Arc::new(Mutex::new(None));
    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    tokio::select! {
        result = event_loop(feed, gate.clone(), capital.clone(), dispatcher.clone(), positions.clone(), settings.clone(), &config, fees, edge_batcher.as_ref(), opportunity_sink.as_ref(), repos.clone(), events_tx.clone(), last_tick.clone()) => {
            result?;
        }
        _ = &mut shutdown => {
            info!("shutdown signal received, draining");
        }
    }

    gate.set_paused(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    positions.request_close_all();
    let now = chrono::Utc::now();
    if let Some(drain_tick) = *last_tick.lock() {
        positions
            .on_tick(&drain_tick, |_| Decimal::MAX, now)
            .await;
    } else {
        warn!("no market tick observed yet, skipping close-all drain");
    }

    info!("engine stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn event_loop(
    mut feed: MarketFeed,
    gate: Arc<StabilityGate>,
    capital: Arc<CapitalGuard>,
    dispatcher: Arc<OrderDispatcher>,
    positions: Arc<PositionManager>,
    settings: Arc<RuntimeSettings>,
    config: &EngineConfig,
    fees: FeeSchedule,
    edge_batcher: Option<&EdgeBatcher>,
    opportunity_sink: Option<&OpportunitySink>,
    repos: Option<Arc<Repositories>>,
    events: broadcast::Sender<BotEvent>,
    last_tick: Arc<Mutex<Option<basis_core::Tick>>>,
) -> Result<()> {
    let edge_calc = EdgeCalculator;
    let mut opportunity_tracker =
        OpportunityTracker::new(config.baseline_window, config.observation_threshold_bps, fees);

    loop {
        gate.set_feed_stale(feed.is_stale());

        let tick = feed.next_tick().await.context("market feed closed")?;
        *last_tick.lock() = Some(tick);
        let now = chrono::Utc::now();
        let edge = edge_calc.compute(&tick, &fees);

        if let Some(batcher) = edge_batcher {
            batcher.push(EdgeRecord::from_edge(&config.pair_base, 0, &edge, tick.recv_ms, tick.send_ms));
        }
        let _ = events.send(BotEvent::Edge(basis_core::EdgeBroadcast {
            base: config.pair_base.clone(),
            edge,
        }));

        if let Some(opportunity) = opportunity_tracker.on_tick(tick, edge.edge_ps_bps, edge.edge_sp_bps) {
            if let Some(sink) = opportunity_sink {
                sink.push(OpportunityRecord::from_opportunity(&config.pair_base, &opportunity, 0));
            }
        }

        positions
            .on_tick(
                &tick,
                |direction| match direction {
                    basis_core::Direction::PerpToSpot => edge.edge_ps_bps,
                    basis_core::Direction::SpotToPerp => edge.edge_sp_bps,
                },
                now,
            )
            .await;

        if let Some(request) = gate.on_edge(&edge, now) {
            gate.on_dispatch_started(now);
            let notional_usd = settings.notional_usd();

            let mid = PriceContext::from(&tick).mid();
            if let Err(err) = capital
                .check_logged(request.direction, notional_usd, config.leverage, mid)
                .await
            {
                warn!(error = %err, "capital guard refused dispatch");
                gate.on_dispatch_terminal();
                continue;
            }

            match dispatcher.open(request.direction, notional_usd, &tick, request.edge_bps).await {
                Ok(position) => {
                    gate.on_dispatch_terminal();
                    positions.track(position).await;
                }
                Err(err) => {
                    gate.on_dispatch_terminal();
                    if matches!(err, basis_core::DispatchError::BrokenHedge { .. }) {
                        gate.set_paused(true);
                        error!("broken hedge on open: auto-pausing new entries, manual review required");
                    }
                    error!(error = %err, "dispatch failed to open a hedged position");
                    let notification = Notification {
                        ts: now,
                        severity: Severity::Warning,
                        position_id: None,
                        direction: Some(request.direction),
                        notional_usd: Some(notional_usd),
                        pnl_usd: None,
                        message: format!("dispatch failed: {err}"),
                        error_code: None,
                    };
                    let _ = events.send(BotEvent::Notification(notification));
                    if let Some(repos) = &repos {
                        let (role, status) = match &err {
                            basis_core::DispatchError::PartialRecovered { .. } => {
                                (TradeRole::IocFallback, "partial_recovered")
                            }
                            basis_core::DispatchError::BrokenHedge { .. } => {
                                (TradeRole::RecoveryFlatten, "broken")
                            }
                            _ => (TradeRole::Open, "no_fill"),
                        };
                        let trade = TradeRecord::new(
                            &config.pair_base,
                            request.direction.as_str(),
                            gate.threshold_bps(),
                            request.edge_bps,
                            notional_usd,
                            role,
                            json!({"direction": request.direction.as_str(), "notional_usd": notional_usd}),
                            Some(json!({"error": err.to_string()})),
                            status,
                        );
                        if let Err(e) = repos.trades.insert(&trade).await {
                            warn!(error = %e, "failed to persist failed-dispatch trade record, continuing");
                        }
                    }
                }
            }
        }
    }
}
