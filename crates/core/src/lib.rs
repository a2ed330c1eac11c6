pub mod config;
pub mod config_loader;
pub mod errors;
pub mod events;
pub mod traits;
pub mod types;

pub use config::{DatabaseConfig, EngineConfig, ServerConfig};
pub use config_loader::ConfigLoader;
pub use errors::{CapitalError, DispatchError, FeedError, PersistenceError};
pub use events::{BotEvent, EdgeBroadcast, Notification, Severity};
pub use traits::{ExchangeClient, TickSource};
pub use types::{
    BaselineMeans, BaselineSnapshot, Direction, Edge, FeeSchedule, HedgedPosition, Instrument,
    LegResult, Opportunity, OrderSpec, PositionStatus, RejectReason, RollingBaseline,
    SimulatedCosts, Tick, TimeInForce, VolatilitySource,
};
