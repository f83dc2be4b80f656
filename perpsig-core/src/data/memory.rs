//! In-memory candle store backed by sorted vectors.

use super::provider::{DataError, MarketData};
use crate::domain::{Candle, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: BTreeMap<(Symbol, Timeframe), Vec<Candle>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a series. Candles are sorted by open time and duplicate
    /// timestamps keep the last occurrence. Void candles are dropped.
    pub fn insert(&mut self, symbol: impl Into<Symbol>, timeframe: Timeframe, candles: Vec<Candle>) {
        let mut candles: Vec<Candle> = candles.into_iter().filter(|c| !c.is_void()).collect();
        candles.sort_by_key(|c| c.timestamp);
        candles.reverse();
        candles.dedup_by_key(|c| c.timestamp);
        candles.reverse();
        self.series.insert((symbol.into(), timeframe), candles);
    }

    pub fn with_series(mut self, symbol: impl Into<Symbol>, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.insert(symbol, timeframe, candles);
        self
    }

    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<&[Candle]> {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .map(|v| v.as_slice())
    }

    fn require(&self, symbol: &str, timeframe: Timeframe) -> Result<&[Candle], DataError> {
        self.series(symbol, timeframe)
            .ok_or_else(|| DataError::UnknownSeries {
                symbol: symbol.to_string(),
                timeframe,
            })
    }

    /// First and last open time across every series.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.series.values().filter_map(|s| s.first()).map(|c| c.timestamp).min()?;
        let last = self.series.values().filter_map(|s| s.last()).map(|c| c.timestamp).max()?;
        Some((first, last))
    }

    /// A copy holding only candles opened in `[from, to)`.
    pub fn slice(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let series = self
            .series
            .iter()
            .map(|(key, candles)| {
                let kept = candles
                    .iter()
                    .filter(|c| c.timestamp >= from && c.timestamp < to)
                    .copied()
                    .collect();
                (key.clone(), kept)
            })
            .collect();
        Self { series }
    }
}

impl MarketData for InMemoryMarketData {
    fn name(&self) -> &str {
        "memory"
    }

    fn symbols(&self) -> Vec<Symbol> {
        let mut out: Vec<Symbol> = self.series.keys().map(|(s, _)| s.clone()).collect();
        out.dedup();
        out
    }

    fn window(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let candles = self.require(symbol, timeframe)?;
        let cutoff = as_of - timeframe.duration();
        let end = candles.partition_point(|c| c.timestamp <= cutoff);
        let start = end.saturating_sub(limit);
        Ok(candles[start..end].to_vec())
    }

    fn candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<Option<Candle>, DataError> {
        let candles = self.require(symbol, timeframe)?;
        Ok(candles
            .binary_search_by_key(&open_time, |c| c.timestamp)
            .ok()
            .map(|i| candles[i]))
    }

    fn timestamps(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>, DataError> {
        Ok(self
            .require(symbol, timeframe)?
            .iter()
            .map(|c| c.timestamp)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_candles;
    use chrono::Duration;

    fn store() -> InMemoryMarketData {
        InMemoryMarketData::new().with_series(
            "ETHUSDT",
            Timeframe::M5,
            make_candles(&[1.0, 2.0, 3.0, 4.0, 5.0]),
        )
    }

    #[test]
    fn window_excludes_unclosed_candles() {
        let data = store();
        let first = data.timestamps("ETHUSDT", Timeframe::M5).unwrap()[0];
        // candle 2 opens at +10m and closes at +15m
        let w = data
            .window("ETHUSDT", Timeframe::M5, first + Duration::minutes(14), 10)
            .unwrap();
        assert_eq!(w.len(), 2);
        let w = data
            .window("ETHUSDT", Timeframe::M5, first + Duration::minutes(15), 10)
            .unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w.last().unwrap().close, 3.0);
    }

    #[test]
    fn window_keeps_last_n() {
        let data = store();
        let first = data.timestamps("ETHUSDT", Timeframe::M5).unwrap()[0];
        let w = data
            .window("ETHUSDT", Timeframe::M5, first + Duration::hours(1), 2)
            .unwrap();
        let closes: Vec<f64> = w.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![4.0, 5.0]);
    }

    #[test]
    fn unknown_series_is_an_error() {
        let err = store()
            .window("BTCUSDT", Timeframe::M5, Utc::now(), 5)
            .unwrap_err();
        assert!(matches!(err, DataError::UnknownSeries { .. }));
    }

    #[test]
    fn insert_sorts_and_dedups() {
        let mut candles = make_candles(&[1.0, 2.0, 3.0]);
        let mut dup = candles[1];
        dup.close = 9.0;
        candles.push(dup);
        candles.reverse();
        let data = InMemoryMarketData::new().with_series("X", Timeframe::M5, candles);
        let s = data.series("X", Timeframe::M5).unwrap();
        assert_eq!(s.len(), 3);
        assert!(s.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn candle_at_exact_match() {
        let data = store();
        let ts = data.timestamps("ETHUSDT", Timeframe::M5).unwrap();
        assert_eq!(
            data.candle_at("ETHUSDT", Timeframe::M5, ts[2]).unwrap().unwrap().close,
            3.0
        );
        assert!(data
            .candle_at("ETHUSDT", Timeframe::M5, ts[2] + Duration::minutes(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn slice_is_half_open() {
        let data = store();
        let ts = data.timestamps("ETHUSDT", Timeframe::M5).unwrap();
        let part = data.slice(ts[1], ts[3]);
        assert_eq!(part.series("ETHUSDT", Timeframe::M5).unwrap().len(), 2);
    }
}
