pub mod csv_loader;

use async_trait::async_trait;
use chrono_tz::Tz;
use fxbot_core::{Bar, DataError, DataProvider};
use std::path::PathBuf;

/// Serves `<symbol>.csv` files from a directory.
pub struct CsvDataProvider {
    pub directory: PathBuf,
    /// Zone used to localize timestamps that carry no offset.
    pub timezone: Tz,
}

impl CsvDataProvider {
    pub fn new(directory: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            directory: directory.into(),
            timezone,
        }
    }

    pub fn path_for(&self, instrument: &str) -> PathBuf {
        self.directory.join(format!("{}.csv", instrument))
    }
}

#[async_trait]
impl DataProvider for CsvDataProvider {
    async fn load_bars(&self, instrument: &str) -> Result<Vec<Bar>, DataError> {
        let file_path = self.path_for(instrument);
        if !file_path.exists() {
            return Err(DataError::NotFound(format!(
                "No data for {}: CSV file not found: {}",
                instrument,
                file_path.display()
            )));
        }
        csv_loader::load_bars_from_csv(&file_path, self.timezone)
    }

    async fn available_instruments(&self) -> Result<Vec<String>, DataError> {
        let mut instruments = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "csv").unwrap_or(false) {
                if let Some(stem) = path.file_stem() {
                    instruments.push(stem.to_string_lossy().to_string());
                }
            }
        }
        instruments.sort();
        Ok(instruments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Brussels;

    const BARS: &str = "time,open,high,low,close\n2024-01-02 09:00:00,1.1,1.2,1.0,1.15\n";

    #[tokio::test]
    async fn test_load_bars_by_symbol() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("EURUSD.csv"), BARS).unwrap();

        let provider = CsvDataProvider::new(dir.path(), Brussels);
        let bars = provider.load_bars("EURUSD").await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].instrument, "EURUSD");
    }

    #[tokio::test]
    async fn test_missing_symbol_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvDataProvider::new(dir.path(), Brussels);
        let err = provider.load_bars("USDJPY").await.unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)));
        assert!(err.to_string().contains("USDJPY"));
    }

    #[tokio::test]
    async fn test_available_instruments_lists_csv_stems() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("GBPUSD.csv"), BARS).unwrap();
        std::fs::write(dir.path().join("EURUSD.csv"), BARS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();

        let provider = CsvDataProvider::new(dir.path(), Brussels);
        assert_eq!(
            provider.available_instruments().await.unwrap(),
            vec!["EURUSD".to_string(), "GBPUSD".to_string()]
        );
    }
}
