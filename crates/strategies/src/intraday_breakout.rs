use async_trait::async_trait;
use chrono_tz::Tz;
use fxbot_core::*;
use fxbot_indicators::{RangeLevels, SessionRange};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Intraday breakout strategy.
///
/// Tracks the highest high and lowest low of the current local trading day.
/// Goes long when a bar's high breaks above the day's earlier high and short
/// when its low breaks below the day's earlier low. A bar breaking both ways
/// is skipped, and no signal is emitted outside the session window.
pub struct IntradayBreakoutStrategy {
    id: String,
    config: IntradayBreakoutConfig,
    range: SessionRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntradayBreakoutConfig {
    pub instrument: String,
    pub session: SessionWindow,
    /// Timezone defining both the session window and day boundaries.
    pub timezone: Tz,
}

impl IntradayBreakoutConfig {
    pub fn from_app_config(instrument: &str, config: &AppConfig) -> Self {
        Self {
            instrument: instrument.to_string(),
            session: config.session,
            timezone: config.data.timezone,
        }
    }
}

impl Default for IntradayBreakoutConfig {
    fn default() -> Self {
        Self {
            instrument: "EURUSD".to_string(),
            session: SessionWindow::default(),
            timezone: chrono_tz::Europe::Brussels,
        }
    }
}

impl std::fmt::Debug for IntradayBreakoutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntradayBreakoutStrategy")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("levels", &self.range.levels())
            .finish()
    }
}

impl IntradayBreakoutStrategy {
    pub fn new(config: IntradayBreakoutConfig) -> Self {
        Self {
            id: "intraday_breakout".to_string(),
            config,
            range: SessionRange::new(),
        }
    }

    /// The current day's high/low including every bar seen so far.
    pub fn levels(&self) -> Option<RangeLevels> {
        self.range.levels()
    }

    /// Evaluate one bar and fold it into the intraday range.
    pub fn evaluate(&mut self, bar: &Bar) -> Option<Side> {
        let local = bar.timestamp.with_timezone(&self.config.timezone);
        let previous = self.range.next_hl(local.date_naive(), bar.high, bar.low);

        let (long, short) = match previous {
            Some(levels) => (bar.high > levels.high, bar.low < levels.low),
            None => (false, false),
        };

        let side = match (long, short) {
            (true, false) => Some(Side::Buy),
            (false, true) => Some(Side::Sell),
            (true, true) => {
                debug!(
                    instrument = %bar.instrument,
                    timestamp = %bar.timestamp,
                    "Bar broke both intraday levels, skipping"
                );
                None
            }
            (false, false) => None,
        };

        if side.is_some() && !self.config.session.contains(local.time()) {
            debug!(
                instrument = %bar.instrument,
                local_time = %local.format("%H:%M"),
                "Breakout outside trading session, ignoring"
            );
            return None;
        }

        side
    }
}

#[async_trait]
impl Strategy for IntradayBreakoutStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Intraday Breakout"
    }

    async fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        match self.evaluate(bar) {
            Some(side) => vec![Signal {
                instrument: self.config.instrument.clone(),
                action: match side {
                    Side::Buy => SignalAction::BuyEntry,
                    Side::Sell => SignalAction::SellEntry,
                },
                strategy_id: self.id.clone(),
                timestamp: bar.timestamp,
            }],
            None => Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.range.reset();
    }
}
