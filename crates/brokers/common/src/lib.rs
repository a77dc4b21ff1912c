pub mod simulated;

pub use simulated::SimulatedBroker;

use fxbot_core::{CostsConfig, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading frictions applied to every simulated fill.
///
/// Spread and slippage are in price units and always move the fill against
/// the trader. Commission is quoted per standard lot of `lot_size` units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub spread: Decimal,
    pub slippage: Decimal,
    pub commission_per_lot: Decimal,
    pub lot_size: Decimal,
}

impl CostModel {
    /// Price actually paid or received when trading `side` at `base`.
    pub fn fill_price(&self, side: Side, base: Decimal) -> Decimal {
        let adjustment = self.spread / Decimal::TWO + self.slippage;
        match side {
            Side::Buy => base + adjustment,
            Side::Sell => base - adjustment,
        }
    }

    /// Fill price for opening a position on `side`.
    pub fn entry_price(&self, side: Side, base: Decimal) -> Decimal {
        self.fill_price(side, base)
    }

    /// Fill price for closing a position held on `side`.
    pub fn exit_price(&self, side: Side, base: Decimal) -> Decimal {
        self.fill_price(side.opposite(), base)
    }

    pub fn commission(&self, volume: Decimal) -> Decimal {
        if self.lot_size.is_zero() {
            return Decimal::ZERO;
        }
        self.commission_per_lot * volume / self.lot_size
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::from(&CostsConfig::default())
    }
}

impl From<&CostsConfig> for CostModel {
    fn from(costs: &CostsConfig) -> Self {
        Self {
            spread: costs.spread,
            slippage: costs.slippage,
            commission_per_lot: costs.commission_per_lot,
            lot_size: costs.lot_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn costs() -> CostModel {
        CostModel {
            spread: dec!(0.0002),
            slippage: dec!(0.0001),
            commission_per_lot: dec!(7),
            lot_size: dec!(100000),
        }
    }

    #[test]
    fn test_fills_move_against_trader() {
        let c = costs();
        assert_eq!(c.entry_price(Side::Buy, dec!(1.1000)), dec!(1.1002));
        assert_eq!(c.entry_price(Side::Sell, dec!(1.1000)), dec!(1.0998));
        assert_eq!(c.exit_price(Side::Buy, dec!(1.1000)), dec!(1.0998));
        assert_eq!(c.exit_price(Side::Sell, dec!(1.1000)), dec!(1.1002));
    }

    #[test]
    fn test_commission_per_lot() {
        assert_eq!(costs().commission(dec!(50000)), dec!(3.5));
        assert_eq!(CostModel::default().commission(dec!(50000)), Decimal::ZERO);
    }

    #[test]
    fn test_zero_costs_fill_at_base() {
        let c = CostModel::default();
        assert_eq!(c.entry_price(Side::Buy, dec!(1.25)), dec!(1.25));
        assert_eq!(c.exit_price(Side::Sell, dec!(1.25)), dec!(1.25));
    }
}
