use chrono::{DateTime, Utc};
use fxbot_core::*;
use fxbot_indicators::math::decimal_sqrt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate performance of a run. Ratios are fractions, not percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_return: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub max_drawdown: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub sharpe: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub win_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_factor: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub avg_trade: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub exposure_time: Decimal,
    pub num_trades: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_profit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_fees: Decimal,
}

/// Compute summary statistics from a trade log and an equity curve.
///
/// Trade-level figures use gross P&L; `net_profit` subtracts fees.
pub fn compute_metrics(trades: &[Trade], equity_curve: &[EquityPoint]) -> PerformanceSummary {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return PerformanceSummary::default();
    };

    let total_return = if first.equity.is_zero() {
        Decimal::ZERO
    } else {
        (last.equity - first.equity) / first.equity
    };

    let gross_profit: Decimal = trades
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| t.pnl.abs())
        .sum();
    let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();

    let (win_rate, avg_trade) = if trades.is_empty() {
        (Decimal::ZERO, Decimal::ZERO)
    } else {
        let n = Decimal::from(trades.len());
        (
            Decimal::from(winning_trades) / n,
            trades.iter().map(|t| t.pnl).sum::<Decimal>() / n,
        )
    };

    let profit_factor = if gross_loss.is_zero() {
        Decimal::ZERO
    } else {
        gross_profit / gross_loss
    };

    PerformanceSummary {
        total_return,
        max_drawdown: max_drawdown(equity_curve),
        sharpe: trade_sharpe(trades),
        win_rate,
        profit_factor,
        avg_trade,
        exposure_time: exposure(trades, first.timestamp, last.timestamp),
        num_trades: trades.len(),
        net_profit: trades.iter().map(|t| t.net_pnl()).sum(),
        total_fees: trades.iter().map(|t| t.fees).sum(),
    }
}

/// Largest peak-to-trough decline as a fraction of the peak.
fn max_drawdown(equity_curve: &[EquityPoint]) -> Decimal {
    let mut peak = match equity_curve.first() {
        Some(p) => p.equity,
        None => return Decimal::ZERO,
    };
    let mut worst = Decimal::ZERO;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - point.equity) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Sharpe ratio of per-trade returns scaled by the square root of the
/// trade count. Uses the population standard deviation.
fn trade_sharpe(trades: &[Trade]) -> Decimal {
    let returns: Vec<Decimal> = trades
        .iter()
        .filter(|t| !t.notional().is_zero())
        .map(|t| t.pnl / t.notional())
        .collect();
    if returns.is_empty() {
        return Decimal::ZERO;
    }

    let n = Decimal::from(returns.len());
    let mean: Decimal = returns.iter().sum::<Decimal>() / n;
    let variance: Decimal = returns
        .iter()
        .map(|r| {
            let diff = *r - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / n;

    let std_dev = decimal_sqrt(variance);
    if std_dev.is_zero() {
        return Decimal::ZERO;
    }
    (mean / std_dev) * decimal_sqrt(n)
}

/// Fraction of `[start, end]` during which at least one position was open.
fn exposure(trades: &[Trade], start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
    let span = (end - start).num_seconds();
    if span <= 0 || trades.is_empty() {
        return Decimal::ZERO;
    }

    let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = trades
        .iter()
        .map(|t| (t.entry_time.max(start), t.exit_time.min(end)))
        .filter(|(a, b)| b > a)
        .collect();
    intervals.sort();

    let mut covered = 0i64;
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (a, b) in intervals {
        current = match current {
            Some((ca, cb)) if a <= cb => Some((ca, cb.max(b))),
            Some((ca, cb)) => {
                covered += (cb - ca).num_seconds();
                Some((a, b))
            }
            None => Some((a, b)),
        };
    }
    if let Some((ca, cb)) = current {
        covered += (cb - ca).num_seconds();
    }

    Decimal::from(covered) / Decimal::from(span)
}
