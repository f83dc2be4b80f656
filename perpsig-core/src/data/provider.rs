//! Market data port and structured error types.
//!
//! The `MarketData` trait abstracts over candle sources (CSV history,
//! in-memory fixtures, live exchange klines) so the replay loop and the live
//! poller read market data the same way.

use crate::domain::{Candle, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("no {timeframe} series for symbol '{symbol}'")]
    UnknownSeries { symbol: String, timeframe: Timeframe },

    #[error("{symbol} {timeframe}: {have} candles, need {need}")]
    InsufficientHistory {
        symbol: String,
        timeframe: Timeframe,
        have: usize,
        need: usize,
    },

    #[error("data provider error: {0}")]
    Provider(String),
}

/// Read access to OHLCV history.
///
/// Windows only ever contain candles that had closed by `as_of`: a candle
/// opened at `t` on timeframe `tf` is visible once `t + tf <= as_of`.
pub trait MarketData: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Symbols with at least one series, in sorted order.
    fn symbols(&self) -> Vec<Symbol>;

    /// The last `limit` candles closed by `as_of`, oldest first.
    fn window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError>;

    /// The candle opened exactly at `open_time`, if present.
    fn candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<Option<Candle>, DataError>;

    /// Open times of every candle in a series.
    fn timestamps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>, DataError>;
}
