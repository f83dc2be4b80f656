//! Indicator math and the per-window indicator frame.
//!
//! Every function here is a pure series transform: candles or values in, a
//! series of the same length out, with `f64::NAN` during warmup. Nothing at
//! index t reads data past index t, so a window sliced to "≤ T" yields the
//! same values at T as the full history would.

pub mod adx;
pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use adx::adx;
pub use atr::{atr, true_range, wilder_smooth};
pub use ema::ema;
pub use macd::{macd, Macd};
pub use rsi::rsi;
pub use sma::sma;

use crate::domain::Candle;
use std::collections::HashMap;

/// Series names stored by [`IndicatorFrame::standard`].
pub mod names {
    pub const EMA_FAST: &str = "ema_21";
    pub const EMA_MID: &str = "ema_50";
    pub const EMA_SLOW: &str = "ema_200";
    pub const MACD_LINE: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const ATR: &str = "atr";
    pub const ATR_AVG: &str = "atr_avg";
    pub const RSI: &str = "rsi";
    pub const VOLUME_AVG: &str = "volume_avg";
    pub const ADX: &str = "adx";
}

/// Periods for the standard frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSpec {
    pub atr_period: usize,
    pub atr_average_period: usize,
    pub adx_period: usize,
    pub rsi_period: usize,
    pub volume_period: usize,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_average_period: 20,
            adx_period: 14,
            rsi_period: 14,
            volume_period: 20,
        }
    }
}

/// Named indicator series computed over one candle window.
///
/// Built once per window, then queried by index or from the end.
#[derive(Debug, Clone, Default)]
pub struct IndicatorFrame {
    len: usize,
    series: HashMap<String, Vec<f64>>,
}

impl IndicatorFrame {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            series: HashMap::new(),
        }
    }

    /// EMA 21/50/200, MACD(12,26,9), ATR and its SMA, RSI, volume SMA, ADX.
    pub fn standard(candles: &[Candle], spec: &FrameSpec) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let mut frame = Self::new(candles.len());
        frame.insert(names::EMA_FAST, ema(&closes, 21));
        frame.insert(names::EMA_MID, ema(&closes, 50));
        frame.insert(names::EMA_SLOW, ema(&closes, 200));

        let m = macd(&closes, 12, 26, 9);
        frame.insert(names::MACD_LINE, m.line);
        frame.insert(names::MACD_SIGNAL, m.signal);
        frame.insert(names::MACD_HIST, m.histogram);

        let atr_series = atr(candles, spec.atr_period);
        frame.insert(names::ATR_AVG, sma(&atr_series, spec.atr_average_period));
        frame.insert(names::ATR, atr_series);
        frame.insert(names::RSI, rsi(&closes, spec.rsi_period));
        frame.insert(names::VOLUME_AVG, sma(&volumes, spec.volume_period));
        frame.insert(names::ADX, adx(candles, spec.adx_period));
        frame
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.series.insert(name.into(), values);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value at `index`, `None` when out of range or still warming up.
    pub fn get(&self, name: &str, index: usize) -> Option<f64> {
        self.series
            .get(name)
            .and_then(|s| s.get(index).copied())
            .filter(|v| !v.is_nan())
    }

    /// Value `back` rows before the last one (`back = 0` is the last row).
    pub fn back(&self, name: &str, back: usize) -> Option<f64> {
        let index = self.len.checked_sub(back + 1)?;
        self.get(name, index)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.back(name, 0)
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(|s| s.as_slice())
    }
}

/// Last non-NaN value of a series.
pub fn last_valid(values: &[f64]) -> Option<f64> {
    values.iter().rev().find(|v| !v.is_nan()).copied()
}

/// Candles from close prices, one per 5 minutes, starting at 2024-06-03.
///
/// open = previous close, high/low = body ± 1.0, volume = 1000.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    use chrono::{Duration, TimeZone, Utc};
    let base = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle::new(
                base + Duration::minutes(5 * i as i64),
                open,
                open.max(close) + 1.0,
                open.min(close) - 1.0,
                close,
                1000.0,
            )
        })
        .collect()
}

/// Candles from explicit (open, high, low, close) tuples.
#[cfg(test)]
pub fn make_ohlc(rows: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    use chrono::{Duration, TimeZone, Utc};
    let base = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
    rows.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            Candle::new(base + Duration::minutes(5 * i as i64), o, h, l, c, 1000.0)
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_get_skips_warmup() {
        let mut frame = IndicatorFrame::new(3);
        frame.insert("x", vec![f64::NAN, 1.0, 2.0]);
        assert_eq!(frame.get("x", 0), None);
        assert_eq!(frame.get("x", 1), Some(1.0));
        assert_eq!(frame.last("x"), Some(2.0));
        assert_eq!(frame.back("x", 1), Some(1.0));
        assert_eq!(frame.back("x", 3), None);
        assert_eq!(frame.get("missing", 0), None);
    }

    #[test]
    fn standard_frame_fills_every_series() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 + (i as f64 * 0.1).sin() * 5.0).collect();
        let frame = IndicatorFrame::standard(&make_candles(&closes), &FrameSpec::default());
        for name in [
            names::EMA_FAST,
            names::EMA_MID,
            names::EMA_SLOW,
            names::MACD_LINE,
            names::MACD_SIGNAL,
            names::MACD_HIST,
            names::ATR,
            names::ATR_AVG,
            names::RSI,
            names::VOLUME_AVG,
            names::ADX,
        ] {
            assert!(frame.last(name).is_some(), "{name} has no value");
        }
    }

    #[test]
    fn truncated_window_matches_full_history() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.3).cos() * 3.0).collect();
        let candles = make_candles(&closes);
        let spec = FrameSpec::default();
        let full = IndicatorFrame::standard(&candles, &spec);
        let cut = IndicatorFrame::standard(&candles[..80], &spec);
        for name in [names::EMA_FAST, names::ATR, names::RSI, names::MACD_HIST] {
            let a = full.get(name, 79).unwrap();
            let b = cut.last(name).unwrap();
            assert_approx(a, b, DEFAULT_EPSILON);
        }
    }

    #[test]
    fn last_valid_skips_trailing_nan() {
        assert_eq!(last_valid(&[1.0, 2.0, f64::NAN]), Some(2.0));
        assert_eq!(last_valid(&[f64::NAN]), None);
    }
}
