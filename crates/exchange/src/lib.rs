//! Hyperliquid exchange collaborator.
//!
//! # Modules
//!
//! - [`live_client`]: [`live_client::HyperliquidExchangeClient`], the live
//!   `basis_core::ExchangeClient` implementation.
//! - [`feed`]: [`feed::MarketFeed`], the merged perp/spot
//!   `basis_core::TickSource` with reconnect/backoff and staleness tracking.
//! - [`simulator`]: [`simulator::SimulatedExchangeClient`], a deterministic
//!   in-process double used for `DRY_RUN` mode and tests.
//! - [`rest`], [`signing`], [`wallet`], [`websocket`]: transport building
//!   blocks shared by the live client and feed.

pub mod feed;
pub mod live_client;
pub mod rest;
pub mod signing;
pub mod simulator;
pub mod wallet;
pub mod websocket;

pub use feed::MarketFeed;
pub use live_client::HyperliquidExchangeClient;
pub use rest::HyperliquidRest;
pub use simulator::SimulatedExchangeClient;
pub use websocket::HyperliquidWebSocket;
