//! Application configuration.
//!
//! Mirrors the layout of `config.toml`. Every table and key is optional in
//! the file; anything missing falls back to the defaults below, so a file
//! containing only `symbols = ["GBPUSD"]` is a valid configuration.

use crate::models::Timeframe;
use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TradingMode {
    Backtest,
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Backtest => "backtest",
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backtest" => Ok(TradingMode::Backtest),
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => Err(format!(
                "unknown mode '{}' (expected backtest, paper or live)",
                other
            )),
        }
    }
}

impl TryFrom<String> for TradingMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TradingMode> for String {
    fn from(mode: TradingMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Daily trading window in the configured timezone. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a window from two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            start: hhmm::parse(start).map_err(ConfigError::Invalid)?,
            end: hhmm::parse(end).map_err(ConfigError::Invalid)?,
        })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default(),
        }
    }
}

/// Trading cost model inputs, all in price units except the commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostsConfig {
    /// Full bid/ask spread; half is paid on each side of a trade.
    pub spread: Decimal,
    /// Adverse price movement applied to every fill.
    pub slippage: Decimal,
    /// Commission per standard lot, charged when a position closes.
    pub commission_per_lot: Decimal,
    /// Units of base currency in one standard lot.
    pub lot_size: Decimal,
}

impl Default for CostsConfig {
    fn default() -> Self {
        Self {
            spread: Decimal::ZERO,
            slippage: Decimal::ZERO,
            commission_per_lot: Decimal::ZERO,
            lot_size: dec!(100000),
        }
    }
}

/// Connection to the MetaTrader 5 bridge EA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mt5Config {
    pub host: String,
    pub port: u16,
    /// Account login. `0` is fine for offline backtests.
    pub login: u64,
    pub password: String,
    pub server: String,
    /// Seconds to wait for a bridge reply before giving up.
    pub request_timeout_secs: u64,
}

impl Default for Mt5Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            login: 0,
            password: String::new(),
            server: String::new(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding one `{SYMBOL}.csv` per instrument.
    pub csv_dir: PathBuf,
    /// Timezone for naive CSV timestamps, the session window and day boundaries.
    pub timezone: Tz,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("data"),
            timezone: chrono_tz::Europe::Brussels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub state_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            state_file: PathBuf::from("state.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub poll_interval_secs: u64,
    /// How far back each poll requests bars.
    pub lookback_hours: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            lookback_hours: 48,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub session: SessionWindow,
    /// Stop-loss distance as a fraction of the entry price.
    pub sl_pct: Decimal,
    /// Take-profit distance as a fraction of the entry price.
    pub tp_pct: Decimal,
    /// Fraction of account equity committed to each trade.
    pub equity_pct_per_trade: Decimal,
    /// Starting equity for backtests and paper trading.
    pub initial_equity: Decimal,
    pub costs: CostsConfig,
    pub mt5: Mt5Config,
    pub mode: TradingMode,
    pub data: DataConfig,
    pub output: OutputConfig,
    pub live: LiveConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["EURUSD".to_string()],
            timeframe: Timeframe::Hour(1),
            session: SessionWindow::default(),
            sl_pct: dec!(0.005),
            tp_pct: dec!(0.005),
            equity_pct_per_trade: dec!(0.02),
            initial_equity: dec!(100000),
            costs: CostsConfig::default(),
            mt5: Mt5Config::default(),
            mode: TradingMode::Backtest,
            data: DataConfig::default(),
            output: OutputConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read and parse a TOML config file. The result is not yet validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), symbols = ?config.symbols, "Loaded config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Check value ranges the type system can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::Invalid("at least one symbol is required".into()));
        }
        if let Some(sym) = self.symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("empty symbol name '{}'", sym)));
        }

        for (name, value) in [
            ("sl_pct", self.sl_pct),
            ("tp_pct", self.tp_pct),
            ("equity_pct_per_trade", self.equity_pct_per_trade),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.initial_equity <= Decimal::ZERO {
            return Err(ConfigError::Invalid("initial_equity must be positive".into()));
        }

        for (name, value) in [
            ("costs.spread", self.costs.spread),
            ("costs.slippage", self.costs.slippage),
            ("costs.commission_per_lot", self.costs.commission_per_lot),
        ] {
            if value < Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }
        if self.costs.lot_size <= Decimal::ZERO {
            return Err(ConfigError::Invalid("costs.lot_size must be positive".into()));
        }

        if self.session.start >= self.session.end {
            return Err(ConfigError::Invalid(format!(
                "session start {} must be before end {}",
                self.session.start.format("%H:%M"),
                self.session.end.format("%H:%M")
            )));
        }

        if self.live.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("live.poll_interval_secs must be positive".into()));
        }

        Ok(())
    }
}

/// A commented default `config.toml`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Instruments to trade; backtests read data/<SYMBOL>.csv
symbols = ["EURUSD"]
# Bar timeframe: M1, M5, M15, M30, H1, H4 or D1
timeframe = "H1"
# backtest, paper or live (the CLI subcommand overrides this)
mode = "backtest"

# Stop-loss / take-profit as a fraction of the entry price (0.005 = 0.5 %)
sl_pct = 0.005
tp_pct = 0.005
# Fraction of account equity committed to each trade
equity_pct_per_trade = 0.02
initial_equity = 100000

[session]
# Local time in data.timezone; no entries at or after `end`
start = "06:00"
end = "20:00"

[costs]
# Price units; for EURUSD 0.0002 is 2 pips
spread = 0.0
slippage = 0.0
commission_per_lot = 0.0
lot_size = 100000

[mt5]
host = "127.0.0.1"
port = 5556
login = 0
password = ""
server = ""
request_timeout_secs = 30

[data]
csv_dir = "data"
timezone = "Europe/Brussels"

[output]
results_dir = "results"
state_file = "state.json"

[live]
poll_interval_secs = 60
lookback_hours = 48
"#;

/// Serde helpers for `HH:MM` times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| format!("invalid time '{}', expected HH:MM: {}", s, e))
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.timeframe, Timeframe::Hour(1));
        assert_eq!(config.data.timezone, chrono_tz::Europe::Brussels);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_tables_merge_with_defaults() {
        let raw = r#"
            symbols = ["GBPUSD", "USDJPY"]
            mode = "PAPER"
            sl_pct = 0.01

            [costs]
            spread = 0.0002

            [session]
            start = "07:30"
            end = "17:00"
        "#;
        let config = AppConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.symbols, vec!["GBPUSD", "USDJPY"]);
        assert_eq!(config.mode, TradingMode::Paper);
        assert_eq!(config.sl_pct, dec!(0.01));
        assert_eq!(config.tp_pct, dec!(0.005));
        assert_eq!(config.costs.spread, dec!(0.0002));
        assert_eq!(config.costs.slippage, Decimal::ZERO);
        assert_eq!(config.costs.lot_size, dec!(100000));
        assert_eq!(config.session.start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.mt5.port, 5556);
    }

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config = AppConfig::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AppConfig::from_toml_str(r#"timeframe = "W1""#).is_err());
        assert!(AppConfig::from_toml_str(r#"mode = "yolo""#).is_err());
        assert!(AppConfig::from_toml_str("[data]\ntimezone = \"Mars/Olympus\"").is_err());
        assert!(AppConfig::from_toml_str("[session]\nstart = \"25:00\"").is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = AppConfig::default();
        config.symbols.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.equity_pct_per_trade = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.costs.spread = dec!(-0.0001);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session = SessionWindow::parse("20:00", "06:00").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("before end"));
    }

    #[test]
    fn test_session_end_is_exclusive() {
        let session = SessionWindow::parse("06:00", "20:00").unwrap();
        assert!(session.contains(NaiveTime::from_hms_opt(6, 0, 0).unwrap()));
        assert!(session.contains(NaiveTime::from_hms_opt(19, 59, 0).unwrap()));
        assert!(!session.contains(NaiveTime::from_hms_opt(20, 0, 0).unwrap()));
        assert!(!session.contains(NaiveTime::from_hms_opt(5, 0, 0).unwrap()));
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "symbols = [\"AUDUSD\"]").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.symbols, vec!["AUDUSD"]);

        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
