//! TOML bot configuration: engine parameters plus backtest and live sections.
//!
//! Engine sections (`[account]`, `[risk]`, `[execution]`, ...) sit at the
//! top level of the file next to `[backtest]` and `[live]`. Every field is
//! optional; missing fields take the production defaults.

use chrono::NaiveDate;
use perpsig_core::config::{ConfigError as EngineConfigError, EngineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a run (content-addressable hash of the config).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid engine config: {0}")]
    Engine(#[from] EngineConfigError),

    #[error("backtest.train_split must be within (0, 1), got {0}")]
    TrainSplit(f64),

    #[error("no symbols configured")]
    NoSymbols,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    pub backtest: BacktestSection,
    pub live: LiveSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSection {
    /// Traded symbols, in scan order.
    pub symbols: Vec<String>,
    /// Directory holding `<SYMBOL>_<tf>.csv` files.
    pub data_dir: PathBuf,
    /// Inclusive date range; `None` uses everything loaded.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Entry-timeframe steps replayed before scanning starts.
    pub warmup_steps: usize,
    /// Generate seeded random-walk candles instead of reading CSV.
    pub synthetic: bool,
    pub synthetic_days: u32,
    pub seed: u64,
    pub results_dir: PathBuf,
    /// Share of the date range used as the walk-forward training period.
    pub train_split: f64,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            symbols: [
                "BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT", "BNBUSDT", "ADAUSDT", "LINKUSDT",
                "AVAXUSDT", "DOGEUSDT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            data_dir: PathBuf::from("data"),
            start: None,
            end: None,
            warmup_steps: 200,
            synthetic: false,
            synthetic_days: 60,
            seed: 42,
            results_dir: PathBuf::from("results"),
            train_split: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSection {
    /// Exchange REST base URL for public klines.
    pub base_url: String,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub state_file: PathBuf,
    /// JSON-lines lifecycle event log; `None` disables it.
    pub event_log: Option<PathBuf>,
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".into(),
            interval_secs: 300,
            request_timeout_secs: 10,
            state_file: PathBuf::from("data/state.json"),
            event_log: Some(PathBuf::from("data/events.jsonl")),
        }
    }
}

impl BotConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        let split = self.backtest.train_split;
        if !(split > 0.0 && split < 1.0) {
            return Err(ConfigError::TrainSplit(split));
        }
        if self.backtest.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        Ok(())
    }

    /// Deterministic hash of the full configuration.
    ///
    /// Two runs with identical configs share a run id.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
