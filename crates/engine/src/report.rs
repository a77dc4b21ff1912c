use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use fxbot_core::EquityPoint;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

use crate::backtest::BacktestReport;
use crate::EngineError;

#[derive(Serialize)]
struct TradeRow<'a> {
    timestamp_entry: String,
    timestamp_exit: String,
    symbol: &'a str,
    side: &'static str,
    volume: Decimal,
    entry: Decimal,
    exit: Decimal,
    pnl: Decimal,
    fees: Decimal,
    reason: &'static str,
}

#[derive(Serialize)]
struct EquityRow {
    timestamp: String,
    equity: Decimal,
}

/// Write `trades.csv`, `equity_curve.csv`, `summary.json` and
/// `equity_curve.svg` into `out_dir`. Timestamps are rendered in `tz`.
pub fn write_backtest_report(report: &BacktestReport, out_dir: &Path, tz: Tz) -> Result<(), EngineError> {
    std::fs::create_dir_all(out_dir).map_err(|e| EngineError::io(out_dir, e))?;
    let local = |t: DateTime<Utc>| t.with_timezone(&tz).to_rfc3339();

    let trades_path = out_dir.join("trades.csv");
    let mut writer = csv::Writer::from_path(&trades_path)?;
    if report.trades.is_empty() {
        writer.write_record([
            "timestamp_entry",
            "timestamp_exit",
            "symbol",
            "side",
            "volume",
            "entry",
            "exit",
            "pnl",
            "fees",
            "reason",
        ])?;
    }
    for t in &report.trades {
        writer.serialize(TradeRow {
            timestamp_entry: local(t.entry_time),
            timestamp_exit: local(t.exit_time),
            symbol: &t.instrument,
            side: t.side.direction(),
            volume: t.quantity,
            entry: t.entry_price,
            exit: t.exit_price,
            pnl: t.pnl,
            fees: t.fees,
            reason: t.reason.as_str(),
        })?;
    }
    writer.flush().map_err(|e| EngineError::io(&trades_path, e))?;

    let equity_path = out_dir.join("equity_curve.csv");
    let mut writer = csv::Writer::from_path(&equity_path)?;
    if report.equity_curve.is_empty() {
        writer.write_record(["timestamp", "equity"])?;
    }
    for point in &report.equity_curve {
        writer.serialize(EquityRow {
            timestamp: local(point.timestamp),
            equity: point.equity,
        })?;
    }
    writer.flush().map_err(|e| EngineError::io(&equity_path, e))?;

    let summary_path = out_dir.join("summary.json");
    let json = serde_json::to_string_pretty(&report.summary)?;
    std::fs::write(&summary_path, json).map_err(|e| EngineError::io(&summary_path, e))?;

    let chart_path = out_dir.join("equity_curve.svg");
    std::fs::write(&chart_path, equity_svg(&report.equity_curve))
        .map_err(|e| EngineError::io(&chart_path, e))?;

    info!(dir = %out_dir.display(), trades = report.trades.len(), "Backtest report written");
    Ok(())
}

const WIDTH: f64 = 1000.0;
const HEIGHT: f64 = 400.0;
const MARGIN: f64 = 50.0;

/// Render the equity curve as a standalone SVG line chart.
pub fn equity_svg(curve: &[EquityPoint]) -> String {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = WIDTH,
        h = HEIGHT
    );
    svg.push_str(r#"<rect width="100%" height="100%" fill="white"/>"#);
    svg.push('\n');
    let _ = writeln!(
        svg,
        r#"<text x="{}" y="30" font-family="sans-serif" font-size="16" text-anchor="middle">Equity Curve</text>"#,
        WIDTH / 2.0
    );

    let points: Vec<(f64, f64)> = curve
        .iter()
        .filter_map(|p| Some((p.timestamp.timestamp() as f64, p.equity.to_f64()?)))
        .collect();

    if let (Some(first), Some(last)) = (points.first(), points.last()) {
        let (min_eq, max_eq) = points
            .iter()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &(_, e)| (lo.min(e), hi.max(e)));
        let t_span = (last.0 - first.0).max(1.0);
        let e_span = if max_eq > min_eq { max_eq - min_eq } else { 1.0 };
        let plot_w = WIDTH - 2.0 * MARGIN;
        let plot_h = HEIGHT - 2.0 * MARGIN;

        let coords: Vec<String> = points
            .iter()
            .map(|&(t, e)| {
                let x = MARGIN + (t - first.0) / t_span * plot_w;
                let y = HEIGHT - MARGIN - (e - min_eq) / e_span * plot_h;
                format!("{:.1},{:.1}", x, y)
            })
            .collect();

        let _ = writeln!(
            svg,
            r#"<polyline fill="none" stroke="steelblue" stroke-width="1.5" points="{}"/>"#,
            coords.join(" ")
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="11">{:.2}</text>"#,
            5.0,
            MARGIN,
            max_eq
        );
        let _ = writeln!(
            svg,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="11">{:.2}</text>"#,
            5.0,
            HEIGHT - MARGIN,
            min_eq
        );
    }

    svg.push_str("</svg>\n");
    svg
}
