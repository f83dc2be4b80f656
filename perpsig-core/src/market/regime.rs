//! Market regime classification from ATR ratio and ADX.

use crate::config::RegimeConfig;
use crate::domain::{Candle, Regime};
use crate::indicators::{adx, atr, last_valid, sma};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: RegimeConfig,
}

/// Regime plus the readings it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeReading {
    pub regime: Regime,
    pub atr: f64,
    pub atr_ratio: f64,
    pub adx: f64,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Classify a candle window. Missing or zero readings resolve to choppy.
    pub fn detect(&self, candles: &[Candle]) -> RegimeReading {
        let atr_series = atr(candles, self.config.atr_period);
        let current = last_valid(&atr_series);
        let average = last_valid(&sma(&atr_series, self.config.atr_average_period));
        let adx_value = last_valid(&adx(candles, self.config.adx_period)).unwrap_or(0.0);

        let (Some(current), Some(average)) = (current, average) else {
            return RegimeReading {
                regime: Regime::Choppy,
                atr: current.unwrap_or(0.0),
                atr_ratio: 0.0,
                adx: adx_value,
            };
        };
        let reading = self.classify(current, average, adx_value);
        debug!(
            regime = %reading.regime,
            atr_ratio = reading.atr_ratio,
            adx = reading.adx,
            "regime detected"
        );
        reading
    }

    /// Classify from precomputed readings.
    pub fn classify(&self, atr: f64, atr_average: f64, adx: f64) -> RegimeReading {
        if atr_average <= 0.0 || !atr_average.is_finite() || !atr.is_finite() {
            return RegimeReading {
                regime: Regime::Choppy,
                atr,
                atr_ratio: 0.0,
                adx,
            };
        }
        let atr_ratio = atr / atr_average;
        let regime = if atr_ratio > self.config.high_volatility_ratio {
            Regime::HighVolatility
        } else if atr_ratio < self.config.low_volatility_ratio {
            Regime::LowVolatility
        } else if adx > self.config.trend_adx {
            Regime::Trending
        } else {
            Regime::Choppy
        };
        RegimeReading {
            regime,
            atr,
            atr_ratio,
            adx,
        }
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}
