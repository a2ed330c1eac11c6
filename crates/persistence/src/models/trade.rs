//! Dispatch attempt records — one row per order-dispatch episode.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// What role a trade record plays in a dispatch episode: the initial
/// maker-first attempt, an IOC fallback leg, or a partial-fill recovery
/// flatten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeRole {
    Open,
    IocFallback,
    Close,
    RecoveryFlatten,
}

impl TradeRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::IocFallback => "ioc_fallback",
            Self::Close => "close",
            Self::RecoveryFlatten => "recovery_flatten",
        }
    }
}

/// One row of `trades`: a single dispatch attempt, synchronously written
/// before the call returns so a crash cannot lose a trade the operator
/// believes happened.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub base: String,
    pub direction: String,
    pub threshold_bps: Decimal,
    pub mm_best_bps: Decimal,
    pub notional_usd: Decimal,
    pub role: String,
    pub request_id: Uuid,
    pub request_json: JsonValue,
    pub response_json: Option<JsonValue>,
    pub status: String,
}

impl TradeRecord {
    /// Builds a row for one dispatch attempt. `request_json` and
    /// `response_json` carry whatever the caller has on hand (direction,
    /// sizes, fills, error detail) rather than a fixed schema, matching
    /// how the exchange's own envelopes are opaque JSON blobs too.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: &str,
        direction: &str,
        threshold_bps: Decimal,
        mm_best_bps: Decimal,
        notional_usd: Decimal,
        role: TradeRole,
        request_json: JsonValue,
        response_json: Option<JsonValue>,
        status: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            base: base.to_string(),
            direction: direction.to_string(),
            threshold_bps,
            mm_best_bps,
            notional_usd,
            role: role.as_str().to_string(),
            request_id: Uuid::new_v4(),
            request_json,
            response_json,
            status: status.to_string(),
        }
    }
}
