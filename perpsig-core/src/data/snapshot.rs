//! Multi-timeframe view of one symbol at one instant.

use super::provider::{DataError, MarketData};
use crate::config::TimeframeConfig;
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};

/// HTF, primary and entry windows, each holding only candles closed by `as_of`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub htf: Vec<Candle>,
    pub primary: Vec<Candle>,
    pub entry: Vec<Candle>,
}

impl MarketSnapshot {
    pub fn load(
        data: &dyn MarketData,
        symbol: &str,
        timeframes: &TimeframeConfig,
        as_of: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        let limit = timeframes.history_limit;
        Ok(Self {
            symbol: symbol.to_string(),
            as_of,
            htf: data.window(symbol, timeframes.htf, as_of, limit)?,
            primary: data.window(symbol, timeframes.primary, as_of, limit)?,
            entry: data.window(symbol, timeframes.entry, as_of, limit)?,
        })
    }

    /// Errors unless every window has at least `need` candles.
    pub fn require_history(&self, timeframes: &TimeframeConfig, need: usize) -> Result<(), DataError> {
        for (tf, candles) in [
            (timeframes.htf, &self.htf),
            (timeframes.primary, &self.primary),
            (timeframes.entry, &self.entry),
        ] {
            check(&self.symbol, tf, candles.len(), need)?;
        }
        Ok(())
    }

    /// Close of the latest entry-timeframe candle.
    pub fn last_price(&self) -> Option<f64> {
        self.entry.last().map(|c| c.close)
    }

    /// True when no window reaches past `as_of`.
    pub fn is_causal(&self, timeframes: &TimeframeConfig) -> bool {
        [
            (timeframes.htf, &self.htf),
            (timeframes.primary, &self.primary),
            (timeframes.entry, &self.entry),
        ]
        .iter()
        .all(|(tf, candles)| {
            candles
                .iter()
                .all(|c| c.timestamp + tf.duration() <= self.as_of)
        })
    }
}

fn check(symbol: &str, timeframe: Timeframe, have: usize, need: usize) -> Result<(), DataError> {
    if have < need {
        return Err(DataError::InsufficientHistory {
            symbol: symbol.to_string(),
            timeframe,
            have,
            need,
        });
    }
    Ok(())
}
