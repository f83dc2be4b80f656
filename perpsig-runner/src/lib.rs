//! perpsig runner: everything around the core engine that touches the
//! outside world.
//!
//! - TOML configuration and run ids
//! - CSV and synthetic candle loading, public klines over HTTP
//! - Backtest orchestration, metrics and walk-forward validation
//! - JSON/CSV export
//! - File-backed state store and JSON-lines event log for live polling

pub mod config;
pub mod data_loader;
pub mod exchange;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod sinks;
pub mod store;
pub mod walk_forward;

pub use config::{BacktestSection, BotConfig, ConfigError, LiveSection, RunId};
pub use data_loader::{load_for_config, DataSource, LoadError, LoadedData};
pub use exchange::{ExchangeError, KlinesClient};
pub use export::{save_artifacts, save_walk_forward, summary_text};
pub use metrics::{BacktestMetrics, Breakdown};
pub use runner::{default_evaluator, run_backtest_from_config, run_on_data, BacktestReport, RunError};
pub use sinks::JsonlEventSink;
pub use store::JsonFileStore;
pub use walk_forward::{
    run_walk_forward, DegradationFlag, WalkForwardConfig, WalkForwardError, WalkForwardResult,
};
