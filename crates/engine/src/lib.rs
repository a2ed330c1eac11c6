//! Edge computation, stability gate, capital guard, order dispatch and
//! position lifecycle management for the perp/spot basis arbitrage engine.
//!
//! # Modules
//!
//! - [`edge`]: pure tick -> edge conversion ([`EdgeCalculator`])
//! - [`gate`]: the `Idle -> Armed -> Firing -> CoolDown` stability state
//!   machine ([`StabilityGate`]) and its [`RateLimiter`]
//! - [`capital`]: balance/margin admissibility checks ([`CapitalGuard`])
//! - [`dispatcher`]: leg sizing, maker-first/IOC-fallback execution and
//!   partial-fill recovery ([`OrderDispatcher`])
//! - [`position`]: open-position lifecycle and close triggers
//!   ([`PositionManager`])
//! - [`opportunity`]: read-only volatility-source classification
//!   ([`OpportunityTracker`])
//!
//! Data flows leaves-first, matching the module order above: a `Tick` from
//! the exchange collaborator's feed is converted to an `Edge`, fanned out to
//! the gate (which may produce a `DispatchRequest`) and the opportunity
//! tracker in parallel. A fired request passes through the capital guard
//! before the dispatcher opens a position, which the position manager then
//! owns until it closes.

pub mod capital;
pub mod dispatcher;
pub mod edge;
pub mod gate;
pub mod opportunity;
pub mod position;

pub use capital::CapitalGuard;
pub use dispatcher::{ClosePnl, DispatcherConfig, OrderDispatcher, PriceContext};
pub use edge::EdgeCalculator;
pub use gate::{DispatchRequest, RateLimiter, StabilityGate};
pub use opportunity::OpportunityTracker;
pub use position::{CloseTrigger, PositionManager, PositionManagerConfig};
