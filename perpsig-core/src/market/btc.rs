//! Market-wide bias from the reference asset (BTC by default).
//!
//! The bias only changes admission of new entries: a higher score threshold,
//! a smaller size multiplier and a lower concurrent-position cap. Positions
//! already open are never touched.

use crate::config::{MarketRegimeConfig, RiskConfig};
use crate::domain::Candle;
use crate::indicators::{names, FrameSpec, IndicatorFrame};
use crate::market::structure::{trend, Trend};
use serde::{Deserialize, Serialize};
use std::fmt;

const RISK_OFF_RSI: f64 = 40.0;
const RISK_ON_RSI_MIN: f64 = 45.0;
const RISK_ON_RSI_MAX: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketBias {
    RiskOn,
    Neutral,
    RiskOff,
    ExtremeVolatility,
}

impl MarketBias {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketBias::RiskOn => "risk_on",
            MarketBias::Neutral => "neutral",
            MarketBias::RiskOff => "risk_off",
            MarketBias::ExtremeVolatility => "extreme_volatility",
        }
    }
}

impl fmt::Display for MarketBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adjustments applied to new-entry admission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketAdjustment {
    pub bias: MarketBias,
    pub threshold_offset: u32,
    pub size_multiplier: f64,
    pub max_positions: usize,
}

impl MarketAdjustment {
    /// No adjustment: base cap, full size.
    pub fn neutral(max_positions: usize) -> Self {
        Self {
            bias: MarketBias::Neutral,
            threshold_offset: 0,
            size_multiplier: 1.0,
            max_positions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketRegimeFilter {
    config: MarketRegimeConfig,
    base_max_positions: usize,
    spec: FrameSpec,
}

impl MarketRegimeFilter {
    pub fn new(config: MarketRegimeConfig, risk: &RiskConfig) -> Self {
        Self {
            config,
            base_max_positions: risk.max_active_positions,
            spec: FrameSpec::default(),
        }
    }

    pub fn reference_symbol(&self) -> &str {
        &self.config.reference_symbol
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Bias from the reference asset's primary-timeframe window.
    pub fn bias(&self, candles: &[Candle]) -> MarketBias {
        let Some(last) = candles.last() else {
            return MarketBias::Neutral;
        };
        let frame = IndicatorFrame::standard(candles, &self.spec);
        let atr_ratio = match (frame.last(names::ATR), frame.last(names::ATR_AVG)) {
            (Some(a), Some(avg)) if avg > 0.0 => a / avg,
            _ => 1.0,
        };
        if atr_ratio >= self.config.extreme_volatility_ratio {
            return MarketBias::ExtremeVolatility;
        }

        let ema = |name: &str| frame.last(name).unwrap_or(f64::NAN);
        let direction = trend(
            last.close,
            ema(names::EMA_FAST),
            ema(names::EMA_MID),
            ema(names::EMA_SLOW),
        );
        let rsi = frame.last(names::RSI).unwrap_or(50.0);
        match direction {
            Trend::Bearish if rsi < RISK_OFF_RSI => MarketBias::RiskOff,
            Trend::Bullish if (RISK_ON_RSI_MIN..=RISK_ON_RSI_MAX).contains(&rsi) => {
                MarketBias::RiskOn
            }
            _ => MarketBias::Neutral,
        }
    }

    pub fn adjustment_for(&self, bias: MarketBias) -> MarketAdjustment {
        let base = MarketAdjustment::neutral(self.base_max_positions);
        if !self.config.enabled {
            return base;
        }
        match bias {
            MarketBias::RiskOn | MarketBias::Neutral => MarketAdjustment { bias, ..base },
            MarketBias::RiskOff => MarketAdjustment {
                bias,
                threshold_offset: self.config.risk_off_threshold_offset,
                size_multiplier: self.config.risk_off_size_multiplier,
                max_positions: self.config.risk_off_max_positions.min(self.base_max_positions),
            },
            MarketBias::ExtremeVolatility => MarketAdjustment {
                bias,
                threshold_offset: self.config.extreme_threshold_offset,
                size_multiplier: self.config.extreme_size_multiplier,
                max_positions: self.config.extreme_max_positions.min(self.base_max_positions),
            },
        }
    }

    /// Bias and adjustment in one step; neutral when disabled or without data.
    pub fn assess(&self, candles: &[Candle]) -> MarketAdjustment {
        if !self.config.enabled {
            return MarketAdjustment::neutral(self.base_max_positions);
        }
        self.adjustment_for(self.bias(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_candles;

    fn filter() -> MarketRegimeFilter {
        MarketRegimeFilter::new(MarketRegimeConfig::default(), &RiskConfig::default())
    }

    #[test]
    fn empty_window_is_neutral() {
        assert_eq!(filter().bias(&[]), MarketBias::Neutral);
    }

    #[test]
    fn risk_off_shrinks_admission() {
        let adj = filter().adjustment_for(MarketBias::RiskOff);
        assert_eq!(adj.threshold_offset, 5);
        assert_eq!(adj.size_multiplier, 0.7);
        assert_eq!(adj.max_positions, 2);
    }

    #[test]
    fn extreme_volatility_is_strictest() {
        let adj = filter().adjustment_for(MarketBias::ExtremeVolatility);
        assert_eq!(adj.threshold_offset, 10);
        assert_eq!(adj.max_positions, 1);
    }

    #[test]
    fn disabled_filter_is_neutral() {
        let cfg = MarketRegimeConfig {
            enabled: false,
            ..MarketRegimeConfig::default()
        };
        let f = MarketRegimeFilter::new(cfg, &RiskConfig::default());
        let adj = f.adjustment_for(MarketBias::ExtremeVolatility);
        assert_eq!(adj.size_multiplier, 1.0);
        assert_eq!(adj.max_positions, 3);
    }

    #[test]
    fn steady_decline_is_risk_off() {
        let closes: Vec<f64> = (0..260).map(|i| 50_000.0 - i as f64 * 20.0).collect();
        assert_eq!(filter().bias(&make_candles(&closes)), MarketBias::RiskOff);
    }
}
