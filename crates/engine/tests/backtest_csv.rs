use fxbot_core::*;
use fxbot_data::CsvDataProvider;
use fxbot_engine::{load_bars, run_backtest, write_backtest_report, EngineError};
use rust_decimal_macros::dec;

const EURUSD: &str = "\
time,open,high,low,close,tick_volume
2024-01-02 07:00:00,1.1000,1.1010,1.0990,1.1005,100
2024-01-02 08:00:00,1.1005,1.1030,1.0995,1.1020,100
2024-01-02 09:00:00,1.1020,1.1030,1.1000,1.1025,100
2024-01-02 20:00:00,1.1025,1.1100,1.1020,1.1090,100
2024-01-02 21:00:00,1.1090,1.1095,1.1080,1.1085,100
";

fn config(dir: &std::path::Path) -> AppConfig {
    let toml = format!(
        r#"
symbols = ["EURUSD"]
sl_pct = 0.005
tp_pct = 0.005
equity_pct_per_trade = 0.5

[data]
csv_dir = "{}"
timezone = "UTC"
"#,
        dir.display()
    );
    AppConfig::from_toml_str(&toml).unwrap()
}

#[tokio::test]
async fn test_backtest_from_csv_to_report() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("EURUSD.csv"), EURUSD).unwrap();
    let cfg = config(dir.path());

    let provider = CsvDataProvider::new(&cfg.data.csv_dir, cfg.data.timezone);
    let bars = load_bars(&provider, &cfg.symbols).await.unwrap();
    let report = run_backtest(&bars, &cfg).await.unwrap();

    // 08:00 breaks the 07:00 high; long at the 09:00 open of 1.1020 with the
    // target at 1.1020 * 1.005 = 1.107510, reached by the 20:00 bar,
    // whose own breakout falls after the session and is ignored.
    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.side, Side::Buy);
    assert_eq!(trade.entry_price, dec!(1.1020));
    assert_eq!(trade.exit_price, dec!(1.107510));
    assert_eq!(trade.reason, ExitReason::TakeProfit);
    assert!(report.final_equity > cfg.initial_equity);
    assert_eq!(report.summary.num_trades, 1);
    assert_eq!(report.summary.win_rate, dec!(1));

    let out = dir.path().join("results");
    write_backtest_report(&report, &out, cfg.data.timezone).unwrap();
    for file in ["trades.csv", "equity_curve.csv", "summary.json", "equity_curve.svg"] {
        assert!(out.join(file).exists(), "missing {}", file);
    }
    let equity = std::fs::read_to_string(out.join("equity_curve.csv")).unwrap();
    assert_eq!(equity.lines().count(), 3);
}

#[tokio::test]
async fn test_missing_symbol_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let provider = CsvDataProvider::new(&cfg.data.csv_dir, cfg.data.timezone);

    let err = load_bars(&provider, &cfg.symbols).await.unwrap_err();
    assert!(matches!(err, EngineError::Data(DataError::NotFound(_))));
}
