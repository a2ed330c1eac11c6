//! Runtime knobs the control surface mutates that are not already owned by
//! the engine components themselves (threshold lives on `StabilityGate`,
//! the maker/IOC preference lives on `OrderDispatcher`; both are mutated
//! directly by [`crate::commands::CommandExecutor`]).

use parking_lot::RwLock;
use rust_decimal::Decimal;

/// Per-trade notional, read by the orchestration loop on every qualifying
/// edge before it calls into the dispatcher. `dry_run` is deliberately not a
/// `RuntimeSettings` field: the live/simulated `ExchangeClient` is selected
/// once at startup (`crates/cli/src/main.rs`) and there is no safe way to
/// swap it under positions that are already open against a real venue, so
/// `dry_run` is fixed for the process lifetime and reported, not mutated,
/// by the control surface (see `CommandExecutor::set_dry_run`).
pub struct RuntimeSettings {
    notional_usd: RwLock<Decimal>,
    dry_run: bool,
}

impl RuntimeSettings {
    #[must_use]
    pub fn new(initial_notional_usd: Decimal, dry_run: bool) -> Self {
        Self {
            notional_usd: RwLock::new(initial_notional_usd),
            dry_run,
        }
    }

    #[must_use]
    pub fn notional_usd(&self) -> Decimal {
        *self.notional_usd.read()
    }

    pub fn set_notional_usd(&self, notional_usd: Decimal) {
        *self.notional_usd.write() = notional_usd;
    }

    /// Fixed at construction from `EngineConfig.dry_run`; see the module
    /// doc comment for why this has no setter.
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn settings_round_trip() {
        let s = RuntimeSettings::new(dec!(12), false);
        assert_eq!(s.notional_usd(), dec!(12));
        assert!(!s.dry_run());
        s.set_notional_usd(dec!(20));
        assert_eq!(s.notional_usd(), dec!(20));
    }

    #[test]
    fn dry_run_is_fixed_for_the_process_lifetime() {
        let s = RuntimeSettings::new(dec!(12), true);
        assert!(s.dry_run());
    }
}
