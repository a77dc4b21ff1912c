use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Intraday high/low levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeLevels {
    pub high: Decimal,
    pub low: Decimal,
}

/// Running high/low of the current trading day.
///
/// The caller supplies the local calendar date of each bar; the range
/// resets whenever that date changes. `next_hl` returns the levels built
/// from earlier bars of the same day, so a breakout test against its
/// result never sees the bar being tested.
#[derive(Debug, Clone, Default)]
pub struct SessionRange {
    date: Option<NaiveDate>,
    levels: Option<RangeLevels>,
}

impl SessionRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one bar. Returns the levels as they were before this bar
    /// (`None` for the first bar of a day), then folds the bar in.
    pub fn next_hl(&mut self, date: NaiveDate, high: Decimal, low: Decimal) -> Option<RangeLevels> {
        if self.date != Some(date) {
            self.date = Some(date);
            self.levels = None;
        }

        let previous = self.levels;
        self.levels = Some(match previous {
            Some(prev) => RangeLevels {
                high: prev.high.max(high),
                low: prev.low.min(low),
            },
            None => RangeLevels { high, low },
        });
        previous
    }

    pub fn levels(&self) -> Option<RangeLevels> {
        self.levels
    }

    pub fn reset(&mut self) {
        self.date = None;
        self.levels = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_first_bar_of_day_has_no_levels() {
        let mut range = SessionRange::new();
        assert!(range.next_hl(day(1), dec!(2.0), dec!(0.5)).is_none());
        assert_eq!(
            range.levels(),
            Some(RangeLevels { high: dec!(2.0), low: dec!(0.5) })
        );
    }

    #[test]
    fn test_returns_previous_levels_then_extends() {
        let mut range = SessionRange::new();
        range.next_hl(day(1), dec!(1.10), dec!(1.05));
        let prev = range.next_hl(day(1), dec!(1.12), dec!(1.06)).unwrap();
        assert_eq!(prev.high, dec!(1.10));
        assert_eq!(prev.low, dec!(1.05));
        assert_eq!(range.levels().unwrap().high, dec!(1.12));
        assert_eq!(range.levels().unwrap().low, dec!(1.05));
    }

    #[test]
    fn test_resets_on_new_date() {
        let mut range = SessionRange::new();
        range.next_hl(day(1), dec!(2.0), dec!(0.5));
        assert!(range.next_hl(day(2), dec!(1.5), dec!(0.6)).is_none());
        assert_eq!(
            range.levels(),
            Some(RangeLevels { high: dec!(1.5), low: dec!(0.6) })
        );
        // Day 1's wider range is gone.
        let prev = range.next_hl(day(2), dec!(1.4), dec!(0.7)).unwrap();
        assert_eq!(prev, RangeLevels { high: dec!(1.5), low: dec!(0.6) });
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut range = SessionRange::new();
        range.next_hl(day(3), dec!(1), dec!(1));
        range.reset();
        assert!(range.levels().is_none());
        assert!(range.next_hl(day(3), dec!(2), dec!(0)).is_none());
    }
}
