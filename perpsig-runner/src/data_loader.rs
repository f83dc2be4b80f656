//! Candle loading for the runner.
//!
//! Two sources feed the same in-memory store:
//! 1. CSV history: one `<SYMBOL>_<tf>.csv` per symbol and timeframe, columns
//!    `timestamp,open,high,low,close,volume`
//! 2. Synthetic candles: a seeded random walk on the entry timeframe,
//!    resampled up to the coarser ones (developer/demo mode, tagged)
//!
//! Timestamps may be epoch seconds, epoch milliseconds, RFC 3339 or
//! `YYYY-MM-DD HH:MM:SS` (UTC).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use perpsig_core::data::InMemoryMarketData;
use perpsig_core::domain::{Candle, Symbol, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::BotConfig;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing {timeframe} data for '{symbol}': {path} not found")]
    Missing {
        symbol: String,
        timeframe: Timeframe,
        path: PathBuf,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("{path} row {row}: unparseable timestamp '{value}'")]
    BadTimestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },

    #[error("no usable candles in {0}")]
    Empty(PathBuf),
}

/// Where a symbol's candles came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Csv,
    Synthetic,
}

/// Loaded candles plus provenance.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub data: InMemoryMarketData,
    pub sources: BTreeMap<Symbol, DataSource>,
    /// BLAKE3 over every candle, in sorted symbol/timeframe order.
    pub dataset_hash: String,
    pub has_synthetic: bool,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Load whatever the config asks for: synthetic candles or the CSV directory.
pub fn load_for_config(config: &BotConfig) -> Result<LoadedData, LoadError> {
    let bt = &config.backtest;
    let timeframes = required_timeframes(config);
    if bt.synthetic {
        let start = bt
            .start
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().unwrap_or_default());
        return Ok(generate_synthetic(
            &bt.symbols,
            &timeframes,
            start,
            Duration::days(i64::from(bt.synthetic_days)),
            bt.seed,
        ));
    }
    load_csv_dir(&bt.data_dir, &bt.symbols, &timeframes, bt.start, bt.end)
}

/// HTF, primary and entry timeframes, deduplicated, finest last.
pub fn required_timeframes(config: &BotConfig) -> Vec<Timeframe> {
    let tf = &config.engine.timeframes;
    let mut out = vec![tf.htf, tf.primary, tf.entry];
    out.sort_by_key(|t| std::cmp::Reverse(t.minutes()));
    out.dedup();
    out
}

pub fn csv_path(dir: &Path, symbol: &str, timeframe: Timeframe) -> PathBuf {
    dir.join(format!("{symbol}_{timeframe}.csv"))
}

/// Load every symbol × timeframe CSV from `dir`, keeping candles opened
/// within the inclusive date range.
pub fn load_csv_dir(
    dir: &Path,
    symbols: &[Symbol],
    timeframes: &[Timeframe],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<LoadedData, LoadError> {
    let from = start.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc());
    let to = end
        .and_then(|d| d.succ_opt())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    let mut data = InMemoryMarketData::new();
    let mut sources = BTreeMap::new();
    for symbol in symbols {
        for &timeframe in timeframes {
            let path = csv_path(dir, symbol, timeframe);
            if !path.exists() {
                return Err(LoadError::Missing {
                    symbol: symbol.clone(),
                    timeframe,
                    path,
                });
            }
            let candles: Vec<Candle> = read_candles(&path)?
                .into_iter()
                .filter(|c| from.map_or(true, |f| c.timestamp >= f))
                .filter(|c| to.map_or(true, |t| c.timestamp < t))
                .collect();
            if candles.is_empty() {
                return Err(LoadError::Empty(path));
            }
            info!(%symbol, %timeframe, candles = candles.len(), "loaded csv");
            data.insert(symbol.clone(), timeframe, candles);
        }
        sources.insert(symbol.clone(), DataSource::Csv);
    }

    let dataset_hash = dataset_hash(&data, symbols, timeframes);
    Ok(LoadedData {
        data,
        sources,
        dataset_hash,
        has_synthetic: false,
    })
}

/// Parse one candle CSV. Rows failing the OHLC sanity check are dropped
/// with a warning.
pub fn read_candles(path: &Path) -> Result<Vec<Candle>, LoadError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    let mut candles = Vec::new();
    let mut dropped = 0usize;
    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::BadTimestamp {
            path: path.to_path_buf(),
            row: i + 1,
            value: row.timestamp.clone(),
        })?;
        let candle = Candle::new(timestamp, row.open, row.high, row.low, row.close, row.volume);
        if candle.is_sane() {
            candles.push(candle);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "dropped malformed candles");
    }
    Ok(candles)
}

/// Write candles in the format `read_candles` accepts (RFC 3339 timestamps).
pub fn write_candles(path: &Path, candles: &[Candle]) -> Result<(), LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer
        .write_record(["timestamp", "open", "high", "low", "close", "volume"])
        .map_err(csv_err)?;
    for c in candles {
        writer
            .write_record([
                c.timestamp.to_rfc3339(),
                c.open.to_string(),
                c.high.to_string(),
                c.low.to_string(),
                c.close.to_string(),
                c.volume.to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        // Anything past year 5138 in seconds is taken as milliseconds.
        return if n.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Seeded random-walk candles for every symbol.
///
/// The walk runs on the finest timeframe; coarser timeframes are built by
/// resampling it so all series describe the same path.
pub fn generate_synthetic(
    symbols: &[Symbol],
    timeframes: &[Timeframe],
    start: DateTime<Utc>,
    span: Duration,
    seed: u64,
) -> LoadedData {
    let finest = timeframes
        .iter()
        .copied()
        .min_by_key(|t| t.minutes())
        .unwrap_or(Timeframe::M5);
    let steps = (span.num_minutes() / finest.minutes()).max(0) as usize;

    let mut data = InMemoryMarketData::new();
    let mut sources = BTreeMap::new();
    for symbol in symbols {
        warn!(%symbol, "generating synthetic candles, results are tagged synthetic");
        let base = random_walk(symbol, seed, start, finest, steps);
        for &timeframe in timeframes {
            let series = if timeframe == finest {
                base.clone()
            } else {
                resample(&base, finest, timeframe)
            };
            data.insert(symbol.clone(), timeframe, series);
        }
        sources.insert(symbol.clone(), DataSource::Synthetic);
    }

    let dataset_hash = dataset_hash(&data, symbols, timeframes);
    LoadedData {
        data,
        sources,
        dataset_hash,
        has_synthetic: true,
    }
}

fn random_walk(
    symbol: &str,
    seed: u64,
    start: DateTime<Utc>,
    timeframe: Timeframe,
    steps: usize,
) -> Vec<Candle> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Deterministic per-symbol seed
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(symbol.as_bytes());
    let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

    let mut price: f64 = rng.gen_range(20.0..2_000.0);
    // Slow regime drift so trends and ranges both appear.
    let mut drift = 0.0_f64;
    let mut candles = Vec::with_capacity(steps);
    for i in 0..steps {
        if i % 288 == 0 {
            drift = rng.gen_range(-0.0004..0.0004);
        }
        let ret: f64 = drift + rng.gen_range(-0.003..0.003);
        let open = price;
        let close = (price * (1.0 + ret)).max(0.0001);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
        let volume = rng.gen_range(100.0..10_000.0);
        candles.push(Candle::new(
            start + timeframe.duration() * i as i32,
            open,
            high,
            low,
            close,
            volume,
        ));
        price = close;
    }
    candles
}

/// Aggregate candles of `from` into buckets of `to`, aligned to the epoch.
/// Incomplete trailing buckets are dropped.
pub fn resample(candles: &[Candle], from: Timeframe, to: Timeframe) -> Vec<Candle> {
    let per_bucket = (to.minutes() / from.minutes()).max(1) as usize;
    let bucket_ms = to.duration().num_milliseconds();
    let mut out = Vec::new();
    let mut current: Option<(i64, Candle, usize)> = None;

    for c in candles {
        let key = c.timestamp.timestamp_millis().div_euclid(bucket_ms);
        current = match current {
            Some((k, mut agg, n)) if k == key => {
                agg.high = agg.high.max(c.high);
                agg.low = agg.low.min(c.low);
                agg.close = c.close;
                agg.volume += c.volume;
                Some((k, agg, n + 1))
            }
            previous => {
                if let Some((_, agg, n)) = previous {
                    if n == per_bucket {
                        out.push(agg);
                    }
                }
                let open_time = DateTime::from_timestamp_millis(key * bucket_ms).unwrap_or(c.timestamp);
                Some((key, Candle { timestamp: open_time, ..*c }, 1))
            }
        };
    }
    if let Some((_, agg, n)) = current {
        if n == per_bucket {
            out.push(agg);
        }
    }
    out
}

fn dataset_hash(data: &InMemoryMarketData, symbols: &[Symbol], timeframes: &[Timeframe]) -> String {
    let mut symbols: Vec<&Symbol> = symbols.iter().collect();
    symbols.sort();
    let mut hasher = blake3::Hasher::new();
    for symbol in symbols {
        for &tf in timeframes {
            hasher.update(symbol.as_bytes());
            hasher.update(tf.as_str().as_bytes());
            for c in data.series(symbol, tf).unwrap_or_default() {
                hasher.update(&c.timestamp.timestamp_millis().to_le_bytes());
                hasher.update(&c.open.to_le_bytes());
                hasher.update(&c.high.to_le_bytes());
                hasher.update(&c.low.to_le_bytes());
                hasher.update(&c.close.to_le_bytes());
                hasher.update(&c.volume.to_le_bytes());
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}
