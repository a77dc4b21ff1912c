use fxbot_core::{Bar, ExitReason, Position, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stop-loss and take-profit levels attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl Bracket {
    /// Levels placed a fixed fraction of the entry price away on either side.
    pub fn for_entry(side: Side, entry_price: Decimal, sl_pct: Decimal, tp_pct: Decimal) -> Self {
        match side {
            Side::Buy => Self {
                stop_loss: entry_price * (Decimal::ONE - sl_pct),
                take_profit: entry_price * (Decimal::ONE + tp_pct),
            },
            Side::Sell => Self {
                stop_loss: entry_price * (Decimal::ONE + sl_pct),
                take_profit: entry_price * (Decimal::ONE - tp_pct),
            },
        }
    }
}

/// Check whether `bar` touches the position's stop or target.
///
/// Returns the reason and the level price. A bar spanning both levels
/// exits at the stop.
pub fn exit_trigger(position: &Position, bar: &Bar) -> Option<(ExitReason, Decimal)> {
    match position.side {
        Side::Buy => {
            if bar.low <= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if bar.high >= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else {
                None
            }
        }
        Side::Sell => {
            if bar.high >= position.stop_loss {
                Some((ExitReason::StopLoss, position.stop_loss))
            } else if bar.low <= position.take_profit {
                Some((ExitReason::TakeProfit, position.take_profit))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(side: Side, stop_loss: Decimal, take_profit: Decimal) -> Position {
        Position {
            instrument: "EURUSD".to_string(),
            side,
            quantity: dec!(1000),
            entry_price: dec!(10),
            stop_loss,
            take_profit,
            opened_at: Utc::now(),
        }
    }

    fn bar(high: Decimal, low: Decimal) -> Bar {
        Bar {
            instrument: "EURUSD".to_string(),
            timestamp: Utc::now(),
            open: (high + low) / Decimal::TWO,
            high,
            low,
            close: (high + low) / Decimal::TWO,
            volume: Decimal::ZERO,
        }
    }

    #[test]
    fn test_bracket_levels_for_both_sides() {
        let long = Bracket::for_entry(Side::Buy, dec!(10.0), dec!(0.1), dec!(0.1));
        assert_eq!(long.stop_loss, dec!(9.0));
        assert_eq!(long.take_profit, dec!(11.0));

        let short = Bracket::for_entry(Side::Sell, dec!(10.0), dec!(0.1), dec!(0.1));
        assert_eq!(short.stop_loss, dec!(11.0));
        assert_eq!(short.take_profit, dec!(9.0));
    }

    #[test]
    fn test_bracket_asymmetric_pcts() {
        let long = Bracket::for_entry(Side::Buy, dec!(1.2000), dec!(0.005), dec!(0.01));
        assert_eq!(long.stop_loss, dec!(1.194));
        assert_eq!(long.take_profit, dec!(1.212));
    }

    #[test]
    fn test_long_exits() {
        let pos = position(Side::Buy, dec!(9), dec!(11));
        assert_eq!(exit_trigger(&pos, &bar(dec!(10.5), dec!(9.5))), None);
        assert_eq!(
            exit_trigger(&pos, &bar(dec!(10.5), dec!(8.9))),
            Some((ExitReason::StopLoss, dec!(9)))
        );
        assert_eq!(
            exit_trigger(&pos, &bar(dec!(11), dec!(9.5))),
            Some((ExitReason::TakeProfit, dec!(11)))
        );
    }

    #[test]
    fn test_short_exits() {
        let pos = position(Side::Sell, dec!(11), dec!(9));
        assert_eq!(exit_trigger(&pos, &bar(dec!(10.5), dec!(9.5))), None);
        assert_eq!(
            exit_trigger(&pos, &bar(dec!(11.2), dec!(10))),
            Some((ExitReason::StopLoss, dec!(11)))
        );
        assert_eq!(
            exit_trigger(&pos, &bar(dec!(10), dec!(9))),
            Some((ExitReason::TakeProfit, dec!(9)))
        );
    }

    #[test]
    fn test_stop_wins_when_bar_spans_both_levels() {
        let pos = position(Side::Buy, dec!(9), dec!(11));
        assert_eq!(
            exit_trigger(&pos, &bar(dec!(12), dec!(8))),
            Some((ExitReason::StopLoss, dec!(9)))
        );
    }
}
