use chrono::{DateTime, Utc};
use fxbot_core::{Position, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::EngineError;

/// Resumable state of a paper or live session.
///
/// Field and map keys are declared in sorted order so the JSON on disk has
/// stable, sorted keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Open time of the last completed bar handled per symbol.
    #[serde(default)]
    pub last_bar_times: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub positions: BTreeMap<String, Option<PositionRecord>>,
}

/// A position as persisted in the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// `long` or `short`.
    #[serde(with = "direction")]
    pub side: Side,
    pub sl_price: Decimal,
    pub tp_price: Decimal,
    pub volume: Decimal,
}

impl PositionRecord {
    pub fn from_position(position: &Position) -> Self {
        Self {
            entry_price: position.entry_price,
            entry_time: position.opened_at,
            side: position.side,
            sl_price: position.stop_loss,
            tp_price: position.take_profit,
            volume: position.quantity,
        }
    }

    pub fn to_position(&self, instrument: &str) -> Position {
        Position {
            instrument: instrument.to_string(),
            side: self.side,
            quantity: self.volume,
            entry_price: self.entry_price,
            stop_loss: self.sl_price,
            take_profit: self.tp_price,
            opened_at: self.entry_time,
        }
    }
}

impl EngineState {
    /// Empty state with a flat slot for every symbol.
    pub fn for_symbols(symbols: &[String]) -> Self {
        let mut state = Self::default();
        state.track(symbols);
        state
    }

    /// Make sure every symbol has a position slot.
    pub fn track(&mut self, symbols: &[String]) {
        for symbol in symbols {
            self.positions.entry(symbol.clone()).or_insert(None);
        }
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions
            .get(symbol)
            .and_then(|p| p.as_ref())
            .map(|record| record.to_position(symbol))
    }

    pub fn set_position(&mut self, symbol: &str, position: Option<&Position>) {
        self.positions
            .insert(symbol.to_string(), position.map(PositionRecord::from_position));
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter_map(|(symbol, record)| record.as_ref().map(|r| r.to_position(symbol)))
            .collect()
    }

    pub fn last_bar_time(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_bar_times.get(symbol).copied()
    }

    /// Read state from `path`. A missing file yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, EngineError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let state = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "Loaded engine state");
        Ok(Some(state))
    }

    /// Write state to `path` as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }
}

mod direction {
    use fxbot_core::Side;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(side: &Side, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(side.direction())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Side, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "long" | "buy" => Ok(Side::Buy),
            "short" | "sell" => Ok(Side::Sell),
            other => Err(serde::de::Error::custom(format!("unknown side '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position {
            instrument: "EURUSD".to_string(),
            side: Side::Sell,
            quantity: dec!(18000),
            entry_price: dec!(1.1050),
            stop_loss: dec!(1.1105),
            take_profit: dec!(1.0995),
            opened_at: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineState::load(&dir.path().join("state.json")).unwrap().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = EngineState::for_symbols(&["GBPUSD".to_string(), "EURUSD".to_string()]);
        state.set_position("EURUSD", Some(&position()));
        state
            .last_bar_times
            .insert("EURUSD".to_string(), Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());
        state.save(&path).unwrap();

        let loaded = EngineState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.position("EURUSD"), Some(position()));
        assert_eq!(loaded.position("GBPUSD"), None);
        assert_eq!(loaded.open_positions().len(), 1);
    }

    #[test]
    fn test_json_layout() {
        let mut state = EngineState::for_symbols(&["GBPUSD".to_string(), "EURUSD".to_string()]);
        state.set_position("EURUSD", Some(&position()));
        let json = serde_json::to_string_pretty(&state).unwrap();

        assert!(json.find("\"last_bar_times\"").unwrap() < json.find("\"positions\"").unwrap());
        assert!(json.find("\"EURUSD\"").unwrap() < json.find("\"GBPUSD\"").unwrap());
        assert!(json.contains("\"side\": \"short\""));
        assert!(json.contains("\"GBPUSD\": null"));
    }

    #[test]
    fn test_accepts_legacy_file_without_bar_times() {
        let raw = r#"{"positions": {"EURUSD": {"side": "long", "volume": "1000",
            "entry_price": "1.1", "sl_price": "1.09", "tp_price": "1.11",
            "entry_time": "2024-01-02T10:00:00+00:00"}}}"#;
        let state: EngineState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.position("EURUSD").unwrap().side, Side::Buy);
        assert!(state.last_bar_times.is_empty());
    }
}
