//! Observational opportunity records — rich calibration data, never
//! consulted by the trading path itself.

use basis_core::Opportunity;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OpportunityRecord {
    pub detected_at: DateTime<Utc>,
    pub base: String,
    pub perp_bid: Decimal,
    pub perp_ask: Decimal,
    pub spot_bid: Decimal,
    pub spot_ask: Decimal,
    pub perp_bid_mean: Decimal,
    pub perp_ask_mean: Decimal,
    pub spot_bid_mean: Decimal,
    pub spot_ask_mean: Decimal,
    pub perp_deviation_bps: Decimal,
    pub spot_deviation_bps: Decimal,
    pub perp_movement_bps: Decimal,
    pub spot_movement_bps: Decimal,
    pub volatility_source: String,
    pub ratio: Decimal,
    pub ioc_both_bps: Decimal,
    pub ioc_perp_maker_spot_bps: Decimal,
    pub maker_both_bps: Decimal,
    pub analysis_duration_us: i64,
}

impl OpportunityRecord {
    #[must_use]
    pub fn from_opportunity(base: &str, opportunity: &Opportunity, analysis_duration_us: i64) -> Self {
        Self {
            detected_at: opportunity.detected_at,
            base: base.to_string(),
            perp_bid: opportunity.tick.perp_bid,
            perp_ask: opportunity.tick.perp_ask,
            spot_bid: opportunity.tick.spot_bid,
            spot_ask: opportunity.tick.spot_ask,
            perp_bid_mean: opportunity.baseline.perp_bid_mean,
            perp_ask_mean: opportunity.baseline.perp_ask_mean,
            spot_bid_mean: opportunity.baseline.spot_bid_mean,
            spot_ask_mean: opportunity.baseline.spot_ask_mean,
            perp_deviation_bps: opportunity.perp_deviation_bps,
            spot_deviation_bps: opportunity.spot_deviation_bps,
            perp_movement_bps: opportunity.perp_movement_bps,
            spot_movement_bps: opportunity.spot_movement_bps,
            volatility_source: format!("{:?}", opportunity.source).to_lowercase(),
            ratio: opportunity.ratio,
            ioc_both_bps: opportunity.simulated.ioc_both_bps,
            ioc_perp_maker_spot_bps: opportunity.simulated.ioc_perp_maker_spot_bps,
            maker_both_bps: opportunity.simulated.maker_both_bps,
            analysis_duration_us,
        }
    }
}
