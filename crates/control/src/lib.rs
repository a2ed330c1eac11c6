//! The control surface (spec §6): an HTTP command endpoint, a health
//! check, and a websocket broadcast of the live edge feed and terminal
//! notifications.

pub mod commands;
pub mod handle;
pub mod server;
pub mod settings;

pub use commands::{Command, CommandExecutor, CommandParseError, CommandReply, TifPreference};
pub use handle::EngineHandle;
pub use server::ControlServer;
pub use settings::RuntimeSettings;
