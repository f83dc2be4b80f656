//! Backtest metrics: pure functions over the trade list and equity curve.
//!
//! Every metric is a pure function: trades and/or equity in, scalar out.
//! Nothing here depends on the runner, the data pipeline or the engine loop.

use chrono::NaiveDate;
use perpsig_core::domain::Trade;
use perpsig_core::engine::EquityPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Profit factor reported when there are winners but no losers.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Trades grouped under one key (regime, symbol, exit reason).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub count: usize,
    pub wins: usize,
    pub pnl: f64,
    pub avg_pnl: f64,
}

/// Aggregate results of one backtest run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // ── Counts ──
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive net P&L.
    pub win_rate: f64,

    // ── P&L ──
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub total_fees: f64,

    // ── Risk ──
    /// Deepest peak-to-trough decline, as a negative percent.
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub longest_losing_streak: usize,

    // ── Equity ──
    pub initial_equity: f64,
    pub final_equity: f64,
    pub avg_duration_hours: f64,

    // ── Breakdowns ──
    pub by_regime: BTreeMap<String, Breakdown>,
    pub by_symbol: BTreeMap<String, Breakdown>,
    pub by_exit_reason: BTreeMap<String, Breakdown>,
}

impl BacktestMetrics {
    pub fn compute(trades: &[Trade], equity_curve: &[EquityPoint], initial_equity: f64) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_equity);
        let wins: Vec<f64> = trades.iter().filter(|t| t.is_winner()).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| !t.is_winner()).map(|t| t.pnl).collect();
        let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();

        Self {
            total_trades: trades.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: win_rate(trades),
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            total_return_pct: if initial_equity > 0.0 {
                (final_equity - initial_equity) / initial_equity * 100.0
            } else {
                0.0
            },
            gross_profit: wins.iter().sum(),
            gross_loss: losses.iter().sum::<f64>().abs(),
            avg_win: mean_f64(&wins),
            avg_loss: mean_f64(&losses),
            profit_factor: profit_factor(trades),
            expectancy: expectancy(trades),
            total_fees: trades.iter().map(|t| t.fees).sum(),
            max_drawdown_pct: max_drawdown(&equity) * 100.0,
            sharpe: sharpe_ratio(&daily_closes(equity_curve)),
            longest_losing_streak: longest_losing_streak(trades),
            initial_equity,
            final_equity,
            avg_duration_hours: mean_f64(
                &trades.iter().map(|t| t.duration_hours).collect::<Vec<_>>(),
            ),
            by_regime: breakdown(trades, |t| t.regime.to_string()),
            by_symbol: breakdown(trades, |t| t.symbol.clone()),
            by_exit_reason: breakdown(trades, |t| t.exit_reason.to_string()),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Percent of trades with positive net P&L.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64 * 100.0
}

/// Gross profits / gross losses, capped at [`PROFIT_FACTOR_CAP`].
pub fn profit_factor(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();
    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { PROFIT_FACTOR_CAP } else { 0.0 };
    }
    (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
}

/// Average net P&L per trade.
pub fn expectancy(trades: &[Trade]) -> f64 {
    mean_f64(&trades.iter().map(|t| t.pnl).collect::<Vec<_>>())
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &eq in equity {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

/// Annualized Sharpe from a series of daily equity values.
///
/// mean(daily return) / std(daily return) × √252; 0 with fewer than two
/// returns or zero variance.
pub fn sharpe_ratio(daily_equity: &[f64]) -> f64 {
    let returns = returns(daily_equity);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / std * 252.0_f64.sqrt()
}

/// Longest run of consecutive trades with negative P&L.
pub fn longest_losing_streak(trades: &[Trade]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for trade in trades {
        if trade.pnl < 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Last equity value of each UTC day, in order.
pub fn daily_closes(curve: &[EquityPoint]) -> Vec<f64> {
    let mut days: Vec<(NaiveDate, f64)> = Vec::new();
    for point in curve {
        let day = point.timestamp.date_naive();
        if let Some((d, equity)) = days.last_mut() {
            if *d == day {
                *equity = point.equity;
                continue;
            }
        }
        days.push((day, point.equity));
    }
    days.into_iter().map(|(_, e)| e).collect()
}

pub fn breakdown(trades: &[Trade], key: impl Fn(&Trade) -> String) -> BTreeMap<String, Breakdown> {
    let mut out: BTreeMap<String, Breakdown> = BTreeMap::new();
    for trade in trades {
        let entry = out.entry(key(trade)).or_default();
        entry.count += 1;
        entry.pnl += trade.pnl;
        if trade.is_winner() {
            entry.wins += 1;
        }
    }
    for b in out.values_mut() {
        b.avg_pnl = b.pnl / b.count as f64;
    }
    out
}

// ─── Helpers ────────────────────────────────────────────────────────

fn returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use perpsig_core::domain::{Direction, ExitReason, PositionId, Regime, Trade};

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    pub fn make_trade(i: usize, symbol: &str, pnl: f64, reason: ExitReason, regime: Regime) -> Trade {
        let entry_time = t0() + Duration::hours(i as i64);
        Trade {
            id: PositionId::new(symbol, Direction::Long, entry_time),
            symbol: symbol.into(),
            direction: Direction::Long,
            entry_time,
            entry_price: 100.0,
            exit_time: entry_time + Duration::minutes(30),
            exit_price: 100.0 + pnl / 10.0,
            exit_reason: reason,
            contracts: 10.0,
            leverage: 5.0,
            pnl,
            pnl_percent: pnl / 10.0,
            fees: 0.5,
            fills: vec![],
            regime,
            score: 75,
            entry_reason: "test".into(),
            duration_hours: 0.5,
        }
    }
}
