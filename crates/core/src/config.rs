use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Layered configuration for the engine, loaded from `THRESHOLD_BPS` and
/// friends (§6) via `ConfigLoader`. Timing defaults match the values the
/// spec states explicitly; trading-risk fields (threshold, notional,
/// leverage, pair) have no defaults and must be supplied at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pair_base: String,

    pub threshold_bps: Decimal,
    pub alloc_per_trade_usd: Decimal,
    pub leverage: u8,

    #[serde(default = "default_spike_extra_bps_for_ioc")]
    pub spike_extra_bps_for_ioc: Decimal,

    #[serde(default = "default_max_trades_per_min")]
    pub max_trades_per_min_per_pair: u32,

    #[serde(default = "default_deadman_seconds")]
    pub deadman_seconds: u64,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_alo_open_timeout_ms")]
    pub alo_open_timeout_ms: u64,

    #[serde(default = "default_alo_close_timeout_ms")]
    pub alo_close_timeout_ms: u64,

    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: i64,

    #[serde(default = "default_observation_threshold_bps")]
    pub observation_threshold_bps: Decimal,

    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,

    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: i64,

    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: i64,

    #[serde(default = "default_close_threshold_bps")]
    pub close_threshold_bps: Decimal,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

const fn default_spike_extra_bps_for_ioc() -> Decimal {
    dec!(10)
}
const fn default_max_trades_per_min() -> u32 {
    3
}
const fn default_deadman_seconds() -> u64 {
    5
}
const fn default_alo_open_timeout_ms() -> u64 {
    150
}
const fn default_alo_close_timeout_ms() -> u64 {
    5000
}
const fn default_max_hold_ms() -> i64 {
    60_000
}
const fn default_observation_threshold_bps() -> Decimal {
    dec!(10)
}
const fn default_baseline_window() -> usize {
    20
}
const fn default_dwell_ms() -> i64 {
    1000
}
const fn default_cool_down_ms() -> i64 {
    2000
}
const fn default_close_threshold_bps() -> Decimal {
    dec!(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/basis_arb".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults_from_minimal_json() {
        let json = r#"{
            "pair_base": "BTC",
            "threshold_bps": "20",
            "alloc_per_trade_usd": "12",
            "leverage": 3
        }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.dwell_ms, 1000);
        assert_eq!(cfg.alo_open_timeout_ms, 150);
        assert_eq!(cfg.alo_close_timeout_ms, 5000);
        assert_eq!(cfg.max_hold_ms, 60_000);
        assert_eq!(cfg.max_trades_per_min_per_pair, 3);
        assert_eq!(cfg.deadman_seconds, 5);
        assert_eq!(cfg.baseline_window, 20);
        assert!(!cfg.dry_run);
    }
}
