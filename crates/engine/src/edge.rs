use basis_core::{Edge, FeeSchedule, Tick};
use chrono::Utc;
use rust_decimal::Decimal;

/// Pure, stateless conversion from a tick and a fee schedule into two signed
/// directional edges and a mid reference. Carries no state of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeCalculator;

impl EdgeCalculator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// `edge_ps_bps = 1e4 * (perp_bid - spot_ask) / mid_ref - fees`
    /// `edge_sp_bps = 1e4 * (spot_bid - perp_ask) / mid_ref - fees`
    /// `mid_ref = (perp_bid + perp_ask + spot_bid + spot_ask) / 4`
    #[must_use]
    pub fn compute(&self, tick: &Tick, fees: &FeeSchedule) -> Edge {
        let mid_ref = (tick.perp_bid + tick.perp_ask + tick.spot_bid + tick.spot_ask)
            / Decimal::from(4);
        let fees_bps = fees.taker_roundtrip_bps();
        let ten_k = Decimal::from(10_000);

        let edge_ps_bps = ten_k * (tick.perp_bid - tick.spot_ask) / mid_ref - fees_bps;
        let edge_sp_bps = ten_k * (tick.spot_bid - tick.perp_ask) / mid_ref - fees_bps;

        Edge {
            edge_ps_bps,
            edge_sp_bps,
            mid_ref,
            ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fees() -> FeeSchedule {
        FeeSchedule {
            perp_taker_bps: dec!(2.5),
            spot_taker_bps: dec!(2.5),
            perp_maker_bps: dec!(0),
            spot_maker_bps: dec!(0),
        }
    }

    #[test]
    fn computes_positive_perp_to_spot_edge() {
        let tick = Tick {
            perp_bid: dec!(50.10),
            perp_ask: dec!(50.12),
            spot_bid: dec!(49.95),
            spot_ask: dec!(49.97),
            recv_ms: 0,
            send_ms: None,
        };
        let edge = EdgeCalculator::new().compute(&tick, &fees());
        // mid = (50.10+50.12+49.95+49.97)/4 = 50.035
        // edge_ps = 1e4*(50.10-49.97)/50.035 - 10 = 25.983.. - 10
        assert!(edge.edge_ps_bps > dec!(15));
        assert!(edge.edge_ps_bps > edge.edge_sp_bps);
    }

    #[test]
    fn mid_ref_is_average_of_four_prices() {
        let tick = Tick {
            perp_bid: dec!(100),
            perp_ask: dec!(100.2),
            spot_bid: dec!(99.8),
            spot_ask: dec!(100),
            recv_ms: 0,
            send_ms: None,
        };
        let edge = EdgeCalculator::new().compute(&tick, &fees());
        assert_eq!(edge.mid_ref, dec!(100));
    }

    #[test]
    fn fee_only_edges_are_non_positive_in_a_tight_book() {
        let tick = Tick {
            perp_bid: dec!(100.00),
            perp_ask: dec!(100.01),
            spot_bid: dec!(100.00),
            spot_ask: dec!(100.01),
            recv_ms: 0,
            send_ms: None,
        };
        let edge = EdgeCalculator::new().compute(&tick, &fees());
        assert!(edge.edge_ps_bps <= dec!(0));
        assert!(edge.edge_sp_bps <= dec!(0));
    }

    #[test]
    fn round_trip_edge_identity_holds_in_arbitrage_free_book() {
        let tick = Tick {
            perp_bid: dec!(100.00),
            perp_ask: dec!(100.02),
            spot_bid: dec!(99.99),
            spot_ask: dec!(100.01),
            recv_ms: 0,
            send_ms: None,
        };
        let f = fees();
        let edge = EdgeCalculator::new().compute(&tick, &f);
        assert!(edge.edge_ps_bps + edge.edge_sp_bps <= -f.taker_roundtrip_bps());
    }
}
