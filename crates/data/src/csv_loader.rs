use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use fxbot_core::{Bar, DataError};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

/// Load OHLC bars from a CSV file.
///
/// Expected columns (case-insensitive, any order):
/// `time` (or `timestamp`, `date`, `datetime`), `open`, `high`, `low`, `close`,
/// optionally `tick_volume` / `volume`. Other columns such as `spread` are ignored.
///
/// Timestamps carrying an offset are converted to UTC. Naive timestamps are
/// local times in `tz`. Bare integers are UNIX epoch seconds.
pub fn load_bars_from_csv(path: &Path, tz: Tz) -> Result<Vec<Bar>, DataError> {
    let instrument = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::ParseError(format!("Failed to open CSV {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| DataError::ParseError(format!("Failed to read headers: {}", e)))?
        .clone();

    let col_map = resolve_bar_columns(&headers, &instrument)?;

    let mut bars = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| DataError::ParseError(format!("CSV record error: {}", e)))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let timestamp = parse_timestamp(field(col_map.timestamp), tz).map_err(|e| {
            DataError::ParseError(format!("{} row {}: {}", instrument, line + 1, e))
        })?;
        let open = parse_decimal(field(col_map.open), "open")?;
        let high = parse_decimal(field(col_map.high), "high")?;
        let low = parse_decimal(field(col_map.low), "low")?;
        let close = parse_decimal(field(col_map.close), "close")?;
        let volume = match col_map.volume {
            Some(idx) if !field(idx).is_empty() => parse_decimal(field(idx), "volume")?,
            _ => Decimal::ZERO,
        };

        bars.push(Bar {
            instrument: instrument.clone(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    // Sort by timestamp
    bars.sort_by_key(|b| b.timestamp);
    tracing::debug!(%instrument, bars = bars.len(), path = %path.display(), "Loaded CSV bars");
    Ok(bars)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct BarColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
}

fn resolve_bar_columns(headers: &csv::StringRecord, instrument: &str) -> Result<BarColumnMap, DataError> {
    let required = |names: &[&str], label: &str| {
        find_column(headers, names).ok_or_else(|| {
            DataError::ParseError(format!(
                "CSV for {} is missing required column '{}'",
                instrument, label
            ))
        })
    };

    Ok(BarColumnMap {
        timestamp: required(&["time", "timestamp", "date", "datetime"], "time")?,
        open: required(&["open", "o"], "open")?,
        high: required(&["high", "h"], "high")?,
        low: required(&["low", "l"], "low")?,
        close: required(&["close", "c"], "close")?,
        volume: find_column(headers, &["tick_volume", "volume", "vol", "v"]),
    })
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    for name in names {
        if let Some(i) = headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name)) {
            return Some(i);
        }
    }
    None
}

fn parse_decimal(s: &str, field: &str) -> Result<Decimal, DataError> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| DataError::ParseError(format!("Failed to parse {} '{}': {}", field, s, e)))
}

/// Parse a timestamp, localizing naive values in `tz`.
pub fn parse_timestamp(s: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let s = s.trim();

    // RFC 3339 / ISO 8601 with offset
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    // Common formats without offset, local to `tz`
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%Y%m%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return localize(naive, tz);
        }
    }

    // Date only: local midnight
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return localize(naive, tz);
        }
    }

    // Unix timestamp (seconds)
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(format!("Unable to parse timestamp: '{}'", s))
}

/// Interpret a naive local time in `tz`. Ambiguous times (DST fall-back)
/// resolve to the earlier instant; skipped times (spring-forward) are errors.
fn localize(naive: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, String> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(format!(
            "Local time {} does not exist in {}",
            naive, tz
        )),
    }
}
