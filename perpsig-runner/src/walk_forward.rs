//! Walk-forward validation: one train/test split by date.
//!
//! The loaded date range is cut at `train_split` (70% by default). Both
//! halves replay independently and in parallel with the same config; the
//! test metrics are then compared against the train metrics to flag
//! overfitting.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use perpsig_core::data::InMemoryMarketData;
use perpsig_core::evaluator::CandidateEvaluator;
use perpsig_core::lifecycle::NullSink;

use crate::config::BotConfig;
use crate::metrics::BacktestMetrics;
use crate::runner::{run_on_data, RunError};

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Share of the date range used for training, in (0, 1).
    pub train_split: f64,
    /// Test return below this share of a positive train return is degraded.
    pub min_return_ratio: f64,
    /// Test profit factor below this share of the train profit factor is degraded.
    pub min_profit_factor_ratio: f64,
    /// Allowed win-rate drop, in percentage points.
    pub max_win_rate_drop: f64,
    /// Test drawdown deeper than this multiple of the train drawdown is degraded.
    pub max_drawdown_ratio: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_split: 0.7,
            min_return_ratio: 0.5,
            min_profit_factor_ratio: 0.7,
            max_win_rate_drop: 10.0,
            max_drawdown_ratio: 1.5,
        }
    }
}

impl WalkForwardConfig {
    pub fn from_bot_config(config: &BotConfig) -> Self {
        Self {
            train_split: config.backtest.train_split,
            ..Self::default()
        }
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// A way the test period fell short of the train period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradationFlag {
    ReturnCollapsed { train_pct: f64, test_pct: f64 },
    ProfitFactorDropped { train: f64, test: f64 },
    WinRateDropped { train: f64, test: f64 },
    ExpectancyTurnedNegative { train: f64, test: f64 },
    DrawdownDeepened { train_pct: f64, test_pct: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub split_at: DateTime<Utc>,
    pub train: BacktestMetrics,
    pub test: BacktestMetrics,
    pub flags: Vec<DegradationFlag>,
}

impl WalkForwardResult {
    /// True when the test period held up on every check.
    pub fn is_robust(&self) -> bool {
        self.flags.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("no candles loaded")]
    NoData,
    #[error("train split {0} leaves an empty period")]
    EmptyPeriod(f64),
    #[error("{period} run failed: {source}")]
    Run {
        period: &'static str,
        #[source]
        source: RunError,
    },
}

// ─── Split and run ───────────────────────────────────────────────────

/// The instant at `split` of the way from `start` to `end`.
pub fn split_point(start: DateTime<Utc>, end: DateTime<Utc>, split: f64) -> DateTime<Utc> {
    let span_ms = (end - start).num_milliseconds() as f64;
    start + Duration::milliseconds((span_ms * split).round() as i64)
}

pub fn run_walk_forward(
    config: &BotConfig,
    data: &InMemoryMarketData,
    evaluator: Arc<dyn CandidateEvaluator>,
    wf: &WalkForwardConfig,
) -> Result<WalkForwardResult, WalkForwardError> {
    let (start, last) = data.span().ok_or(WalkForwardError::NoData)?;
    let split_at = split_point(start, last, wf.train_split);
    if split_at <= start || split_at >= last {
        return Err(WalkForwardError::EmptyPeriod(wf.train_split));
    }

    let train_data = data.slice(start, split_at);
    let test_data = data.slice(split_at, last + Duration::milliseconds(1));
    info!(%start, %split_at, %last, "walk-forward split");

    let train_eval = Arc::clone(&evaluator);
    let (train, test) = rayon::join(
        || run_on_data(config, &train_data, train_eval, &mut NullSink),
        || run_on_data(config, &test_data, evaluator, &mut NullSink),
    );
    let (_, train) = train.map_err(|source| WalkForwardError::Run {
        period: "train",
        source,
    })?;
    let (_, test) = test.map_err(|source| WalkForwardError::Run {
        period: "test",
        source,
    })?;

    let flags = degradation_flags(&train, &test, wf);
    for flag in &flags {
        warn!(?flag, "test period degraded");
    }
    info!(
        train_trades = train.total_trades,
        test_trades = test.total_trades,
        flags = flags.len(),
        "walk-forward complete"
    );
    Ok(WalkForwardResult {
        split_at,
        train,
        test,
        flags,
    })
}

/// Compare test metrics against train metrics.
pub fn degradation_flags(
    train: &BacktestMetrics,
    test: &BacktestMetrics,
    wf: &WalkForwardConfig,
) -> Vec<DegradationFlag> {
    let mut flags = Vec::new();

    if train.total_return_pct > 0.0
        && test.total_return_pct < train.total_return_pct * wf.min_return_ratio
    {
        flags.push(DegradationFlag::ReturnCollapsed {
            train_pct: train.total_return_pct,
            test_pct: test.total_return_pct,
        });
    }
    if train.profit_factor > 0.0
        && test.profit_factor < train.profit_factor * wf.min_profit_factor_ratio
    {
        flags.push(DegradationFlag::ProfitFactorDropped {
            train: train.profit_factor,
            test: test.profit_factor,
        });
    }
    if test.total_trades > 0 && test.win_rate < train.win_rate - wf.max_win_rate_drop {
        flags.push(DegradationFlag::WinRateDropped {
            train: train.win_rate,
            test: test.win_rate,
        });
    }
    if train.expectancy > 0.0 && test.expectancy < 0.0 {
        flags.push(DegradationFlag::ExpectancyTurnedNegative {
            train: train.expectancy,
            test: test.expectancy,
        });
    }
    // Drawdowns are negative percents.
    if train.max_drawdown_pct < 0.0
        && test.max_drawdown_pct < train.max_drawdown_pct * wf.max_drawdown_ratio
    {
        flags.push(DegradationFlag::DrawdownDeepened {
            train_pct: train.max_drawdown_pct,
            test_pct: test.max_drawdown_pct,
        });
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::load_for_config;
    use crate::runner::default_evaluator;
    use chrono::TimeZone;

    fn metrics(ret: f64, pf: f64, wr: f64, exp: f64, dd: f64) -> BacktestMetrics {
        BacktestMetrics {
            total_trades: 20,
            total_return_pct: ret,
            profit_factor: pf,
            win_rate: wr,
            expectancy: exp,
            max_drawdown_pct: dd,
            ..BacktestMetrics::default()
        }
    }

    #[test]
    fn split_point_is_proportional() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::days(10);
        assert_eq!(split_point(start, end, 0.7), start + Duration::days(7));
    }

    #[test]
    fn similar_periods_raise_no_flags() {
        let train = metrics(10.0, 1.8, 55.0, 4.0, -5.0);
        let test = metrics(6.0, 1.5, 50.0, 3.0, -6.0);
        assert!(degradation_flags(&train, &test, &WalkForwardConfig::default()).is_empty());
    }

    #[test]
    fn every_check_can_fire() {
        let train = metrics(10.0, 2.0, 60.0, 5.0, -4.0);
        let test = metrics(2.0, 0.9, 40.0, -1.0, -9.0);
        let flags = degradation_flags(&train, &test, &WalkForwardConfig::default());
        assert_eq!(flags.len(), 5);
        assert!(matches!(flags[0], DegradationFlag::ReturnCollapsed { .. }));
        assert!(matches!(flags[4], DegradationFlag::DrawdownDeepened { .. }));
    }

    #[test]
    fn losing_train_period_skips_relative_checks() {
        let train = metrics(-3.0, 0.0, 30.0, -2.0, 0.0);
        let test = metrics(-5.0, 0.0, 25.0, -3.0, -2.0);
        assert!(degradation_flags(&train, &test, &WalkForwardConfig::default()).is_empty());
    }

    #[test]
    fn empty_data_is_an_error() {
        let config = BotConfig::default();
        let err = run_walk_forward(
            &config,
            &InMemoryMarketData::new(),
            default_evaluator(&config.engine),
            &WalkForwardConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, WalkForwardError::NoData));
    }

    #[test]
    fn synthetic_walk_forward_splits_at_seventy_percent() {
        let mut config = BotConfig::default();
        config.backtest.symbols = vec!["SOLUSDT".into()];
        config.backtest.synthetic = true;
        config.backtest.synthetic_days = 30;
        config.backtest.warmup_steps = 60;
        let loaded = load_for_config(&config).unwrap();
        let (start, last) = loaded.data.span().unwrap();

        let result = run_walk_forward(
            &config,
            &loaded.data,
            default_evaluator(&config.engine),
            &WalkForwardConfig::from_bot_config(&config),
        )
        .unwrap();
        assert_eq!(result.split_at, split_point(start, last, 0.7));
        assert!(result.split_at > start && result.split_at < last);
        assert_eq!(result.is_robust(), result.flags.is_empty());
    }
}
