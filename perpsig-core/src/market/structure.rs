//! Trend direction from EMA alignment, swing extremes, EMA proximity.

use crate::domain::{Candle, Direction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EMA21 must lead EMA50 by this fraction for the momentum variant.
const EMA_SPREAD_MIN: f64 = 0.005;
/// Price must sit this far beyond EMA200 for the price-action variant.
const PRICE_BEYOND_SLOW_MIN: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        }
    }

    /// The trade direction this trend supports, if any.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Trend::Bullish => Some(Direction::Long),
            Trend::Bearish => Some(Direction::Short),
            Trend::Neutral => None,
        }
    }

    pub fn agrees_with(self, direction: Direction) -> bool {
        self.direction() == Some(direction)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the trend from the last close and EMA 21/50/200.
///
/// Bullish when the EMAs are stacked under price, or price and EMA21 lead
/// EMA50 by a clear spread, or price clears all three and EMA200 by 2%.
/// Bearish mirrors this. Anything else, including NaN input, is neutral.
pub fn trend(price: f64, ema21: f64, ema50: f64, ema200: f64) -> Trend {
    if [price, ema21, ema50, ema200].iter().any(|v| !v.is_finite()) || ema50 <= 0.0 || ema200 <= 0.0
    {
        return Trend::Neutral;
    }

    // ── Bullish ──
    if price > ema21 && ema21 > ema50 && ema50 > ema200 {
        return Trend::Bullish;
    }
    if price > ema21 && price > ema50 && ema21 > ema50 {
        return if (ema21 - ema50) / ema50 > EMA_SPREAD_MIN {
            Trend::Bullish
        } else {
            Trend::Neutral
        };
    }
    if price > ema21 && price > ema50 && price > ema200 {
        return if (price - ema200) / ema200 > PRICE_BEYOND_SLOW_MIN {
            Trend::Bullish
        } else {
            Trend::Neutral
        };
    }

    // ── Bearish ──
    if price < ema21 && ema21 < ema50 && ema50 < ema200 {
        return Trend::Bearish;
    }
    if price < ema21 && price < ema50 && ema21 < ema50 {
        return if (ema50 - ema21) / ema50 > EMA_SPREAD_MIN {
            Trend::Bearish
        } else {
            Trend::Neutral
        };
    }
    if price < ema21 && price < ema50 && price < ema200 && (ema200 - price) / ema200 > PRICE_BEYOND_SLOW_MIN {
        return Trend::Bearish;
    }
    Trend::Neutral
}

/// Lowest low over the last `lookback` candles.
pub fn swing_low(candles: &[Candle], lookback: usize) -> Option<f64> {
    let start = candles.len().saturating_sub(lookback);
    candles[start..]
        .iter()
        .map(|c| c.low)
        .filter(|v| !v.is_nan())
        .reduce(f64::min)
}

/// Highest high over the last `lookback` candles.
pub fn swing_high(candles: &[Candle], lookback: usize) -> Option<f64> {
    let start = candles.len().saturating_sub(lookback);
    candles[start..]
        .iter()
        .map(|c| c.high)
        .filter(|v| !v.is_nan())
        .reduce(f64::max)
}

/// The swing extreme a stop for `direction` would sit behind.
pub fn swing_for(candles: &[Candle], lookback: usize, direction: Direction) -> Option<f64> {
    match direction {
        Direction::Long => swing_low(candles, lookback),
        Direction::Short => swing_high(candles, lookback),
    }
}

/// True when `price` is within `threshold` (a fraction) of `ema`.
pub fn is_near(price: f64, ema: f64, threshold: f64) -> bool {
    if !(ema.is_finite() && ema != 0.0) {
        return false;
    }
    ((price - ema) / ema).abs() <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_ohlc;

    #[test]
    fn stacked_emas_are_bullish() {
        assert_eq!(trend(110.0, 105.0, 100.0, 90.0), Trend::Bullish);
        assert_eq!(trend(80.0, 85.0, 90.0, 100.0), Trend::Bearish);
    }

    #[test]
    fn momentum_variant_needs_spread() {
        // EMA50 under EMA200, but EMA21 leads EMA50 by 1%
        assert_eq!(trend(103.0, 101.0, 100.0, 104.0), Trend::Bullish);
        // spread only 0.2%
        assert_eq!(trend(103.0, 100.2, 100.0, 104.0), Trend::Neutral);
    }

    #[test]
    fn price_action_variant() {
        // EMA21 below EMA50 but price 3% over EMA200
        assert_eq!(trend(103.0, 101.0, 102.0, 100.0), Trend::Bullish);
        assert_eq!(trend(97.0, 99.0, 98.0, 100.0), Trend::Bearish);
    }

    #[test]
    fn nan_is_neutral() {
        assert_eq!(trend(100.0, f64::NAN, 99.0, 98.0), Trend::Neutral);
    }

    #[test]
    fn swings_use_lookback_only() {
        let candles = make_ohlc(&[
            (10.0, 11.0, 1.0, 10.0),
            (10.0, 12.0, 9.0, 11.0),
            (11.0, 13.0, 8.0, 12.0),
        ]);
        assert_eq!(swing_low(&candles, 2), Some(8.0));
        assert_eq!(swing_low(&candles, 5), Some(1.0));
        assert_eq!(swing_high(&candles, 2), Some(13.0));
        assert_eq!(swing_for(&candles, 2, Direction::Short), Some(13.0));
        assert_eq!(swing_low(&[], 5), None);
    }

    #[test]
    fn near_ema_threshold() {
        assert!(is_near(100.1, 100.0, 0.002));
        assert!(!is_near(100.3, 100.0, 0.002));
        assert!(!is_near(100.0, f64::NAN, 0.002));
    }

    #[test]
    fn trend_direction_mapping() {
        assert!(Trend::Bullish.agrees_with(Direction::Long));
        assert!(!Trend::Neutral.agrees_with(Direction::Short));
    }
}
