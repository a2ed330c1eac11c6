use crate::config::EngineConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

/// Loads `EngineConfig` from a TOML base file, unprefixed environment
/// variables (`THRESHOLD_BPS`, `ALLOC_PER_TRADE_USD`, ... per §6 — this
/// engine intentionally does not use the `APP_`-prefixed convention, since
/// the spec's interface names these variables bare), and an optional JSON
/// overlay for operator overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or
    /// if a required field (e.g. `threshold_bps`) is missing from every
    /// layer.
    pub fn load() -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Env::raw())
            .join(Json::file("config/Config.json"))
            .extract()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(profile: &str) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Toml::file("config/Config.toml"))
            .merge(Toml::file(format!("config/Config.{profile}.toml")))
            .merge(Env::raw())
            .join(Json::file("config/Config.json"))
            .extract()?;

        Ok(config)
    }
}
