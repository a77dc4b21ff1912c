use rust_decimal::Decimal;
use tracing::debug;

/// Sizes entries as a fixed fraction of account equity.
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    equity_pct: Decimal,
}

impl PositionSizer {
    pub fn new(equity_pct: Decimal) -> Self {
        Self { equity_pct }
    }

    /// Volume in units of the base currency for an entry at `price`.
    /// Zero means "don't trade".
    pub fn volume(&self, equity: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || equity <= Decimal::ZERO {
            debug!(%equity, %price, "Cannot size position");
            return Decimal::ZERO;
        }
        equity * self.equity_pct / price
    }
}
