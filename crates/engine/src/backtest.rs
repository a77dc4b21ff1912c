use fxbot_brokers_common::{CostModel, SimulatedBroker};
use fxbot_core::*;
use fxbot_risk::{exit_trigger, Bracket, PositionSizer};
use fxbot_strategies::{IntradayBreakoutConfig, IntradayBreakoutStrategy};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::metrics::{compute_metrics, PerformanceSummary};
use crate::EngineError;

/// Everything a backtest produces.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub symbols: Vec<String>,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub summary: PerformanceSummary,
}

/// Load bars for each configured symbol.
pub async fn load_bars(
    provider: &dyn DataProvider,
    symbols: &[String],
) -> Result<HashMap<String, Vec<Bar>>, EngineError> {
    let mut bars_by_symbol = HashMap::new();
    for symbol in symbols {
        let bars = provider.load_bars(symbol).await?;
        info!(%symbol, bars = bars.len(), "Loaded historical data");
        bars_by_symbol.insert(symbol.clone(), bars);
    }
    Ok(bars_by_symbol)
}

/// One symbol's bar stream during a replay.
struct SymbolRun<'a> {
    symbol: &'a str,
    bars: &'a [Bar],
    strategy: IntradayBreakoutStrategy,
}

/// Replay historical bars through the intraday breakout strategy.
///
/// All symbols trade from one account and are merged into a single
/// timeline ordered by timestamp, ties going to the symbol listed first in
/// the configuration. The strategy only sees bars while its symbol is flat,
/// so a bar that closes a position can still signal. Signals on a bar enter
/// at the next bar's open.
pub async fn run_backtest(
    bars_by_symbol: &HashMap<String, Vec<Bar>>,
    config: &AppConfig,
) -> Result<BacktestReport, EngineError> {
    let costs = CostModel::from(&config.costs);
    let sizer = PositionSizer::new(config.equity_pct_per_trade);
    let mut broker = SimulatedBroker::new(config.initial_equity, costs);
    broker.connect().await?;

    let mut runs = Vec::new();
    for symbol in &config.symbols {
        match bars_by_symbol.get(symbol) {
            Some(bars) if bars.len() >= 2 => runs.push(SymbolRun {
                symbol,
                bars,
                strategy: IntradayBreakoutStrategy::new(IntradayBreakoutConfig::from_app_config(
                    symbol, config,
                )),
            }),
            Some(bars) => warn!(%symbol, bars = bars.len(), "Not enough bars to trade, skipping"),
            None => warn!(%symbol, "No data loaded, skipping"),
        }
    }
    if runs.is_empty() {
        warn!(symbols = ?config.symbols, "No symbol has enough bars, nothing to replay");
        return Ok(BacktestReport {
            symbols: Vec::new(),
            initial_equity: config.initial_equity,
            final_equity: config.initial_equity,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            summary: PerformanceSummary::default(),
        });
    }

    // (timestamp, symbol slot, bar index); the sort is stable on slot order.
    let mut timeline: Vec<(chrono::DateTime<chrono::Utc>, usize, usize)> = runs
        .iter()
        .enumerate()
        .flat_map(|(slot, run)| run.bars.iter().enumerate().map(move |(i, b)| (b.timestamp, slot, i)))
        .collect();
    timeline.sort();

    let start = timeline[0].0;
    let end = timeline[timeline.len() - 1].0;
    info!(
        symbols = ?runs.iter().map(|r| r.symbol).collect::<Vec<_>>(),
        events = timeline.len(),
        %start,
        %end,
        "Starting backtest"
    );

    let mut equity_curve = vec![EquityPoint {
        timestamp: start,
        equity: config.initial_equity,
    }];

    for (_, slot, index) in timeline {
        let run = &mut runs[slot];
        let bar = &run.bars[index];
        let next = run.bars.get(index + 1);

        let Some(next) = next else {
            // Final bar for this symbol: flatten at its close.
            if let Some(position) = broker.position(run.symbol).cloned() {
                let order = Order::exit(&position, bar.close, ExitReason::EndOfData, bar.timestamp);
                broker.submit_order(order).await?;
                record_equity(&mut equity_curve, &broker, bar);
            }
            continue;
        };

        if let Some(position) = broker.position(run.symbol).cloned() {
            let Some((reason, level)) = exit_trigger(&position, bar) else {
                // Levels stay frozen while a position is open.
                continue;
            };
            broker
                .submit_order(Order::exit(&position, level, reason, bar.timestamp))
                .await?;
            record_equity(&mut equity_curve, &broker, bar);
        }

        let signals = run.strategy.on_bar(bar).await;
        let Some(signal) = signals.first() else {
            continue;
        };

        let side = signal.action.side();
        let volume = sizer.volume(broker.account().equity, next.open);
        if volume.is_zero() {
            warn!(symbol = run.symbol, "Zero volume, entry skipped");
            continue;
        }
        let expected_entry = costs.entry_price(side, next.open);
        let bracket = Bracket::for_entry(side, expected_entry, config.sl_pct, config.tp_pct);
        let order = Order::entry(
            run.symbol,
            side,
            volume,
            next.open,
            bracket.stop_loss,
            bracket.take_profit,
            next.timestamp,
        );
        let filled = broker.submit_order(order).await?;
        debug!(
            symbol = run.symbol,
            %side,
            %volume,
            entry = ?filled.fill_price,
            sl = %bracket.stop_loss,
            tp = %bracket.take_profit,
            "Entered position"
        );
    }

    let trades = broker.trade_log().to_vec();
    let summary = compute_metrics(&trades, &equity_curve);
    let final_equity = broker.account().equity;
    info!(
        trades = trades.len(),
        %final_equity,
        total_return = %summary.total_return,
        "Backtest complete"
    );

    Ok(BacktestReport {
        symbols: runs.iter().map(|r| r.symbol.to_string()).collect(),
        initial_equity: config.initial_equity,
        final_equity,
        trades,
        equity_curve,
        summary,
    })
}

fn record_equity(curve: &mut Vec<EquityPoint>, broker: &SimulatedBroker, bar: &Bar) {
    curve.push(EquityPoint {
        timestamp: bar.timestamp,
        equity: broker.account().equity,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, hour: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> Bar {
        Bar {
            instrument: symbol.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, hour, 0, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: Decimal::ZERO,
        }
    }

    fn config(symbols: &[&str]) -> AppConfig {
        AppConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            sl_pct: dec!(0.1),
            tp_pct: dec!(0.1),
            equity_pct_per_trade: dec!(0.1),
            initial_equity: dec!(1000),
            data: DataConfig {
                timezone: chrono_tz::UTC,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_long_take_profit() {
        let bars = vec![
            bar("X", 8, dec!(10), dec!(10), dec!(9), dec!(10)),
            // Breaks the high: enter long at next open 10.
            bar("X", 9, dec!(10), dec!(10.5), dec!(9.5), dec!(10)),
            bar("X", 10, dec!(10), dec!(10.5), dec!(9.5), dec!(10.2)),
            // Touches 11 = take profit; 20:00 is past the session so no re-entry.
            bar("X", 20, dec!(10.5), dec!(11.2), dec!(10.4), dec!(11)),
            bar("X", 21, dec!(11), dec!(11), dec!(10.8), dec!(10.9)),
        ];
        let data = HashMap::from([("X".to_string(), bars)]);
        let report = run_backtest(&data, &config(&["X"])).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.entry_price, dec!(10));
        assert_eq!(trade.exit_price, dec!(11));
        assert_eq!(trade.quantity, dec!(10));
        assert_eq!(trade.pnl, dec!(10));
        assert_eq!(trade.reason, ExitReason::TakeProfit);
        assert_eq!(trade.entry_time, Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap());
        assert_eq!(trade.exit_time, Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap());

        assert_eq!(report.equity_curve.len(), 2);
        assert_eq!(report.equity_curve[0].equity, dec!(1000));
        assert_eq!(report.equity_curve[1].equity, dec!(1010));
        assert_eq!(report.final_equity, dec!(1010));
    }

    #[tokio::test]
    async fn test_open_position_closed_at_end_of_data() {
        let bars = vec![
            bar("X", 8, dec!(10), dec!(10), dec!(9), dec!(10)),
            bar("X", 9, dec!(10), dec!(9.8), dec!(8.5), dec!(9)),
            bar("X", 10, dec!(9), dec!(9.2), dec!(8.8), dec!(9.1)),
        ];
        let data = HashMap::from([("X".to_string(), bars)]);
        let report = run_backtest(&data, &config(&["X"])).await.unwrap();

        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.reason, ExitReason::EndOfData);
        assert_eq!(trade.exit_price, dec!(9.1));
        // Short 1000 * 0.1 / 9 units from 9 to 9.1.
        assert!(trade.pnl < Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_costs_shift_fills_and_levels() {
        let bars = vec![
            bar("X", 8, dec!(10), dec!(10), dec!(9), dec!(10)),
            bar("X", 9, dec!(10), dec!(10.5), dec!(9.5), dec!(10)),
            bar("X", 10, dec!(10), dec!(10.5), dec!(9.5), dec!(10)),
            bar("X", 11, dec!(10), dec!(10), dec!(8.9), dec!(9)),
            bar("X", 12, dec!(9), dec!(9), dec!(9), dec!(9)),
        ];
        let mut cfg = config(&["X"]);
        cfg.costs.spread = dec!(0.2);
        cfg.costs.commission_per_lot = dec!(100000);

        let data = HashMap::from([("X".to_string(), bars)]);
        let report = run_backtest(&data, &cfg).await.unwrap();
        let trade = &report.trades[0];

        // Entry 10 + 0.1; stop at 10.1 * 0.9 = 9.09; exit 9.09 - 0.1.
        assert_eq!(trade.entry_price, dec!(10.1));
        assert_eq!(trade.reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price, dec!(8.99));
        assert_eq!(trade.fees, dec!(10));
        assert_eq!(trade.pnl, (dec!(8.99) - dec!(10.1)) * dec!(10));
    }

    #[tokio::test]
    async fn test_symbols_share_one_account() {
        let x = vec![
            bar("X", 18, dec!(10), dec!(10), dec!(9), dec!(10)),
            bar("X", 19, dec!(10), dec!(10.5), dec!(9.5), dec!(10)),
            bar("X", 20, dec!(10), dec!(11), dec!(9.5), dec!(11)),
            bar("X", 21, dec!(11), dec!(11), dec!(11), dec!(11)),
        ];
        let y = vec![
            bar("Y", 18, dec!(20), dec!(20), dec!(19), dec!(20)),
            bar("Y", 19, dec!(20), dec!(19.5), dec!(18), dec!(19)),
            bar("Y", 20, dec!(20), dec!(20), dec!(18), dec!(18)),
            bar("Y", 21, dec!(18), dec!(18), dec!(18), dec!(18)),
        ];
        let data = HashMap::from([("X".to_string(), x), ("Y".to_string(), y)]);
        let report = run_backtest(&data, &config(&["X", "Y"])).await.unwrap();

        assert_eq!(report.symbols, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(report.trades.len(), 2);
        // Both positions close at 20:00; X is listed first.
        assert_eq!(report.trades[0].instrument, "X");
        assert_eq!(report.trades[1].instrument, "Y");
        let total: Decimal = report.trades.iter().map(|t| t.net_pnl()).sum();
        assert_eq!(report.final_equity, dec!(1000) + total);
        assert_eq!(report.equity_curve.len(), 3);
    }

    #[tokio::test]
    async fn test_levels_frozen_while_in_position() {
        let bars = vec![
            bar("X", 8, dec!(10), dec!(10), dec!(9), dec!(10)),
            // Long at the 10:00 open of 10: stop 9.5, target 11.
            bar("X", 9, dec!(10), dec!(10.5), dec!(9.5), dec!(10)),
            // New high while long; not part of the breakout levels.
            bar("X", 10, dec!(10), dec!(10.9), dec!(9.6), dec!(10.5)),
            // Stops out and breaks the 10.5 high seen before the entry.
            bar("X", 11, dec!(10.5), dec!(10.7), dec!(9.4), dec!(9.6)),
            bar("X", 12, dec!(9.6), dec!(9.7), dec!(9.55), dec!(9.65)),
            bar("X", 13, dec!(9.65), dec!(9.7), dec!(9.6), dec!(9.7)),
        ];
        let mut cfg = config(&["X"]);
        cfg.sl_pct = dec!(0.05);
        let data = HashMap::from([("X".to_string(), bars)]);
        let report = run_backtest(&data, &cfg).await.unwrap();

        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.trades[0].reason, ExitReason::StopLoss);
        assert_eq!(report.trades[0].exit_price, dec!(9.5));
        let second = &report.trades[1];
        assert_eq!(second.side, Side::Buy);
        assert_eq!(second.entry_price, dec!(9.6));
        assert_eq!(second.entry_time, Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        assert_eq!(second.reason, ExitReason::EndOfData);
    }

    #[tokio::test]
    async fn test_no_usable_data_gives_empty_report() {
        let data = HashMap::from([(
            "X".to_string(),
            vec![bar("X", 8, dec!(1), dec!(1), dec!(1), dec!(1))],
        )]);
        let report = run_backtest(&data, &config(&["X"])).await.unwrap();
        assert!(report.symbols.is_empty());
        assert!(report.trades.is_empty());
        assert!(report.equity_curve.is_empty());
        assert_eq!(report.final_equity, dec!(1000));
        assert_eq!(report.summary, PerformanceSummary::default());
    }
}
