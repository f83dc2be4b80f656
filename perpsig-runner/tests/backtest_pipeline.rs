//! Integration tests for the runner pipeline: CSV and synthetic candles
//! through the replay engine, metrics and artifact export.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use perpsig_core::data::MarketSnapshot;
use perpsig_core::domain::{Candle, Direction, Timeframe};
use perpsig_core::evaluator::{CandidateEvaluator, Evaluation, FnEvaluator};
use perpsig_core::lifecycle::{NullSink, RecordingSink};
use perpsig_runner::config::BotConfig;
use perpsig_runner::data_loader::{
    csv_path, load_csv_dir, load_for_config, required_timeframes, resample, write_candles,
    LoadError,
};
use perpsig_runner::export::{load_artifacts, save_artifacts, save_walk_forward};
use perpsig_runner::runner::{default_evaluator, run_backtest_from_config};
use perpsig_runner::walk_forward::{run_walk_forward, WalkForwardConfig};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

/// Five-minute sine wave with an upward drift.
fn entry_candles(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 3.0 + i as f64 * 0.004;
            let open = close - 0.1;
            Candle::new(
                start() + Duration::minutes(5 * i as i64),
                open,
                close.max(open) + 0.4,
                close.min(open) - 0.4,
                close,
                1_000.0,
            )
        })
        .collect()
}

fn config_for(dir: &std::path::Path, symbols: &[&str]) -> BotConfig {
    let mut config = BotConfig::default();
    config.engine.market_regime.enabled = false;
    config.engine.regime.trend_adx = 0.0;
    config.engine.regime.low_volatility_ratio = 0.0;
    config.backtest.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.backtest.data_dir = dir.join("data");
    config.backtest.results_dir = dir.join("results");
    config.backtest.warmup_steps = 60;
    config
}

fn write_fixture(config: &BotConfig, n: usize) {
    std::fs::create_dir_all(&config.backtest.data_dir).unwrap();
    let base = entry_candles(n);
    for symbol in &config.backtest.symbols {
        for tf in required_timeframes(config) {
            let series = if tf == Timeframe::M5 {
                base.clone()
            } else {
                resample(&base, Timeframe::M5, tf)
            };
            write_candles(&csv_path(&config.backtest.data_dir, symbol, tf), &series).unwrap();
        }
    }
}

/// Goes long whenever the last entry candle closed up.
fn momentum() -> Arc<dyn CandidateEvaluator> {
    Arc::new(FnEvaluator::new("momentum", 2, |s: &MarketSnapshot, d: Direction| {
        let n = s.entry.len();
        if n < 2 {
            return Ok(Evaluation::rejected("short window"));
        }
        let up = s.entry[n - 1].close > s.entry[n - 2].close;
        let valid = d == Direction::Long && up;
        Ok(Evaluation {
            valid,
            reason: "momentum".into(),
            score: if valid { 90 } else { 0 },
        })
    }))
}

#[test]
fn csv_backtest_exports_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), &["ETHUSDT"]);
    write_fixture(&config, 3_000);

    let loaded = load_for_config(&config).unwrap();
    assert!(!loaded.has_synthetic);

    let mut sink = RecordingSink::new();
    let report = run_backtest_from_config(&config, &loaded, momentum(), &mut sink).unwrap();
    assert!(report.metrics.total_trades > 0, "momentum on a drifting wave should trade");
    assert_eq!(
        sink.names().iter().filter(|n| **n == "opened").count(),
        report.metrics.total_trades
    );
    for trade in &report.run.trades {
        let closed: f64 = trade.fills.iter().map(|f| f.percent).sum();
        assert!((closed - 100.0).abs() < 1e-6, "{} closed {closed}%", trade.id);
    }

    let run_dir = save_artifacts(&report, &config.backtest.results_dir).unwrap();
    let trades_csv = std::fs::read_to_string(run_dir.join("trades.csv")).unwrap();
    assert_eq!(trades_csv.lines().count(), report.metrics.total_trades + 1);
    let back = load_artifacts(&run_dir).unwrap();
    assert_eq!(back.metrics, report.metrics);
    assert_eq!(back.dataset_hash, loaded.dataset_hash);
}

#[test]
fn date_range_trims_loaded_candles() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), &["ETHUSDT"]);
    write_fixture(&config, 2 * 288 * 3);

    let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
    let loaded = load_csv_dir(
        &config.backtest.data_dir,
        &config.backtest.symbols,
        &[Timeframe::M5],
        Some(day2),
        Some(day2),
    )
    .unwrap();
    let series = loaded.data.series("ETHUSDT", Timeframe::M5).unwrap();
    assert_eq!(series.len(), 288);
    assert_eq!(series[0].timestamp, start() + Duration::days(1));
}

#[test]
fn missing_csv_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), &["ETHUSDT", "XRPUSDT"]);
    write_fixture(&config_for(dir.path(), &["ETHUSDT"]), 500);
    let err = load_for_config(&config).unwrap_err();
    assert!(matches!(err, LoadError::Missing { ref symbol, .. } if symbol == "XRPUSDT"));
}

#[test]
fn synthetic_walk_forward_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path(), &["BTCUSDT", "ETHUSDT"]);
    config.engine.market_regime.enabled = true;
    config.backtest.synthetic = true;
    config.backtest.synthetic_days = 25;

    let loaded = load_for_config(&config).unwrap();
    let result = run_walk_forward(
        &config,
        &loaded.data,
        default_evaluator(&config.engine),
        &WalkForwardConfig::from_bot_config(&config),
    )
    .unwrap();
    let path = save_walk_forward(&result, &config.run_id(), &config.backtest.results_dir).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert!(json.get("train").is_some());
    assert!(json.get("test").is_some());
}

#[test]
fn same_config_same_data_same_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path(), &["SOLUSDT"]);
    config.backtest.synthetic = true;
    config.backtest.synthetic_days = 15;
    let loaded = load_for_config(&config).unwrap();

    let a = run_backtest_from_config(&config, &loaded, momentum(), &mut NullSink).unwrap();
    let b = run_backtest_from_config(&config, &loaded, momentum(), &mut NullSink).unwrap();
    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.run.trades, b.run.trades);
    assert_eq!(a.run.equity_curve, b.run.equity_curve);
}
