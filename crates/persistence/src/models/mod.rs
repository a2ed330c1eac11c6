//! Data models for the arbitrage engine's persisted relations. All
//! financial fields use `rust_decimal::Decimal`; models derive
//! `sqlx::FromRow` for direct query mapping.

pub mod edge;
pub mod opportunity;
pub mod position;
pub mod trade;

pub use edge::EdgeRecord;
pub use opportunity::OpportunityRecord;
pub use position::PositionRecord;
pub use trade::{TradeRecord, TradeRole};
