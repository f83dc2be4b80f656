//! Immutable engine configuration.
//!
//! Built once (from defaults or a TOML file in the runner), validated, then
//! passed by reference into every component. Nothing in the engine mutates it,
//! so independent runs with different parameters can execute side by side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Timeframe;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("take-profit close percents must sum to 100, got {0}")]
    ClosePercentSum(f64),

    #[error("take-profit risk multiples must be strictly increasing: {0:?}")]
    MultiplesNotIncreasing([f64; 3]),

    #[error("leverage tiers must be sorted by stop distance with leverage >= 1")]
    LeverageTiers,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub account: AccountConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub stops: StopConfig,
    pub take_profit: TakeProfitConfig,
    pub adaptive_stop: AdaptiveStopConfig,
    pub near_tp: NearTpConfig,
    pub scoring: ScoringConfig,
    pub regime: RegimeConfig,
    pub market_regime: MarketRegimeConfig,
    pub timeframes: TimeframeConfig,
}

impl EngineConfig {
    /// Reject values that would make the engine misbehave rather than merely trade badly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("account.initial_capital", self.account.initial_capital)?;

        in_range("risk.risk_per_trade", self.risk.risk_per_trade, 1e-6, 0.1)?;
        in_range("risk.max_leverage", self.risk.max_leverage, 1.0, 125.0)?;
        in_range(
            "risk.max_margin_fraction",
            self.risk.max_margin_fraction,
            0.01,
            1.0,
        )?;
        in_range("risk.max_daily_loss", self.risk.max_daily_loss, 0.0, 1.0)?;
        in_range("risk.max_weekly_loss", self.risk.max_weekly_loss, 0.0, 1.0)?;
        positive("risk.cooldown_hours", self.risk.cooldown_hours)?;
        positive("risk.weekly_cooldown_hours", self.risk.weekly_cooldown_hours)?;
        if self.risk.max_active_positions == 0 {
            return Err(ConfigError::NotPositive {
                field: "risk.max_active_positions",
                value: 0.0,
            });
        }
        let tiers = &self.risk.leverage_tiers;
        if tiers.is_empty()
            || tiers.iter().any(|t| t.leverage < 1.0 || t.max_stop_fraction <= 0.0)
            || tiers
                .windows(2)
                .any(|w| w[1].max_stop_fraction <= w[0].max_stop_fraction)
        {
            return Err(ConfigError::LeverageTiers);
        }

        in_range("execution.slippage_percent", self.execution.slippage_percent, 0.0, 5.0)?;
        in_range(
            "execution.stop_slippage_percent",
            self.execution.stop_slippage_percent,
            0.0,
            5.0,
        )?;
        in_range("execution.taker_fee_percent", self.execution.taker_fee_percent, 0.0, 1.0)?;
        in_range("execution.maker_fee_percent", self.execution.maker_fee_percent, 0.0, 1.0)?;

        positive("stops.atr_multiplier", self.stops.atr_multiplier)?;
        positive("stops.max_stop_atr", self.stops.max_stop_atr)?;

        let tp = &self.take_profit;
        let total: f64 = tp.close_percents.iter().sum();
        if (total - 100.0).abs() > 1e-9 || tp.close_percents.iter().any(|p| *p <= 0.0) {
            return Err(ConfigError::ClosePercentSum(total));
        }
        let m = tp.risk_multiples;
        if !(m[0] > 0.0 && m[0] < m[1] && m[1] < m[2]) {
            return Err(ConfigError::MultiplesNotIncreasing(m));
        }
        in_range("take_profit.high_volatility_scale", tp.high_volatility_scale, 0.1, 1.0)?;
        in_range("take_profit.defensive_scale", tp.defensive_scale, 0.1, 1.0)?;
        in_range("take_profit.tp1_trail_fraction", tp.tp1_trail_fraction, 0.0, 1.0)?;

        let a = &self.adaptive_stop;
        positive("adaptive_stop.volatility_spike", a.volatility_spike)?;
        in_range("adaptive_stop.breakeven_buffer", a.breakeven_buffer, 0.0, 0.05)?;
        in_range(
            "adaptive_stop.protection_close_fraction",
            a.protection_close_fraction,
            0.05,
            0.95,
        )?;

        in_range("near_tp.threshold", self.near_tp.threshold, 0.5, 1.0)?;
        in_range(
            "near_tp.min_pullback_percent",
            self.near_tp.min_pullback_percent,
            0.0,
            50.0,
        )?;

        in_range(
            "scoring.equity_drawdown_fraction",
            self.scoring.equity_drawdown_fraction,
            0.0,
            1.0,
        )?;
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value <= 0.0 {
        return Err(ConfigError::NotPositive { field, value });
    }
    Ok(())
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub initial_capital: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_capital: 2000.0,
        }
    }
}

/// Stop distance (fraction of entry) up to which `leverage` applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeverageTier {
    pub max_stop_fraction: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade.
    pub risk_per_trade: f64,
    pub max_leverage: f64,
    /// Margin for a single position never exceeds this fraction of equity.
    pub max_margin_fraction: f64,
    /// Exchange minimum order size in contracts.
    pub min_contracts: f64,
    /// Exchange minimum order notional in quote currency.
    pub min_notional: f64,
    /// Tighter stop ⇒ higher leverage. Sorted by `max_stop_fraction`.
    pub leverage_tiers: Vec<LeverageTier>,
    /// Leverage when the stop is wider than every tier.
    pub fallback_leverage: f64,
    pub max_daily_loss: f64,
    pub max_weekly_loss: f64,
    pub max_consecutive_losses: u32,
    pub cooldown_hours: f64,
    pub weekly_cooldown_hours: f64,
    pub max_active_positions: usize,
    /// Daily net loss (fraction of equity) beyond which the account is in drawdown.
    pub drawdown_state_fraction: f64,
    /// Daily net gain (fraction of equity) beyond which the account is on a hot streak.
    pub hot_streak_fraction: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.01,
            max_leverage: 15.0,
            max_margin_fraction: 0.40,
            min_contracts: 0.001,
            min_notional: 5.0,
            leverage_tiers: vec![
                LeverageTier {
                    max_stop_fraction: 0.005,
                    leverage: 15.0,
                },
                LeverageTier {
                    max_stop_fraction: 0.01,
                    leverage: 10.0,
                },
                LeverageTier {
                    max_stop_fraction: 0.02,
                    leverage: 5.0,
                },
                LeverageTier {
                    max_stop_fraction: 0.03,
                    leverage: 3.0,
                },
            ],
            fallback_leverage: 2.0,
            max_daily_loss: 0.02,
            max_weekly_loss: 0.06,
            max_consecutive_losses: 3,
            cooldown_hours: 4.0,
            weekly_cooldown_hours: 24.0,
            max_active_positions: 3,
            drawdown_state_fraction: 0.01,
            hot_streak_fraction: 0.02,
        }
    }
}

/// Execution friction. Percent fields are percentages: 0.05 means 0.05%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub slippage_percent: f64,
    /// Extra adverse slippage applied on top of the stop level when a stop fills.
    pub stop_slippage_percent: f64,
    pub taker_fee_percent: f64,
    pub maker_fee_percent: f64,
    /// Market orders fill with slippage at the taker fee; otherwise take-profits
    /// rest as limit orders and fill at their price with the maker fee.
    pub use_market_orders: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_percent: 0.05,
            stop_slippage_percent: 0.1,
            taker_fee_percent: 0.055,
            maker_fee_percent: 0.045,
            use_market_orders: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub swing_lookback: usize,
    /// Buffer beyond the swing extreme, in ATR.
    pub swing_buffer_atr: f64,
    /// Hard cap on stop distance, in ATR.
    pub max_stop_atr: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_multiplier: 2.5,
            swing_lookback: 20,
            swing_buffer_atr: 0.2,
            max_stop_atr: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    pub risk_multiples: [f64; 3],
    pub close_percents: [f64; 3],
    /// Multiple scale in high-volatility regimes.
    pub high_volatility_scale: f64,
    /// Multiple scale in choppy and low-volatility regimes.
    pub defensive_scale: f64,
    /// After tp1 the stop moves this fraction of the remaining risk toward entry.
    pub tp1_trail_fraction: f64,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            risk_multiples: [1.5, 2.5, 3.5],
            close_percents: [50.0, 30.0, 20.0],
            high_volatility_scale: 0.8,
            defensive_scale: 0.6,
            tp1_trail_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveStopConfig {
    pub enabled: bool,
    /// Minimum open profit, in R, before protection can engage.
    pub min_profit_r: f64,
    /// ATR relative to entry ATR that counts as a volatility spike.
    pub volatility_spike: f64,
    /// Engage when the regime degrades from trending to ranging.
    pub regime_change: bool,
    /// Protected stop sits this fraction beyond entry.
    pub breakeven_buffer: f64,
    /// Close part of the position at the protected level and let the rest run.
    pub partial_protection: bool,
    /// Share of the remaining size closed by partial protection.
    pub protection_close_fraction: f64,
}

impl Default for AdaptiveStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_profit_r: 0.4,
            volatility_spike: 1.6,
            regime_change: true,
            breakeven_buffer: 0.0015,
            partial_protection: true,
            protection_close_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearTpConfig {
    pub enabled: bool,
    /// Fraction of the entry-to-target distance the best price must reach.
    pub threshold: f64,
    /// Pullback from the best price, in percent, that triggers the early exit.
    pub min_pullback_percent: f64,
}

impl Default for NearTpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.92,
            min_pullback_percent: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub threshold_normal: u32,
    pub threshold_drawdown: u32,
    pub threshold_hot_streak: u32,
    /// A candidate scoring at least this passes even when its entry checks fail.
    pub override_score: u32,
    /// Equity below this fraction of initial capital counts as drawdown.
    pub equity_drawdown_fraction: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold_normal: 70,
            threshold_drawdown: 85,
            threshold_hot_streak: 65,
            override_score: 80,
            equity_drawdown_fraction: 0.98,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub atr_period: usize,
    pub atr_average_period: usize,
    pub adx_period: usize,
    pub high_volatility_ratio: f64,
    pub low_volatility_ratio: f64,
    pub trend_adx: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_average_period: 20,
            adx_period: 14,
            high_volatility_ratio: 1.5,
            low_volatility_ratio: 0.7,
            trend_adx: 25.0,
        }
    }
}

/// Market-wide adjustments driven by the reference asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketRegimeConfig {
    pub enabled: bool,
    pub reference_symbol: String,
    /// ATR ratio above which the market is treated as extremely volatile.
    pub extreme_volatility_ratio: f64,
    pub risk_off_threshold_offset: u32,
    pub risk_off_size_multiplier: f64,
    pub risk_off_max_positions: usize,
    pub extreme_threshold_offset: u32,
    pub extreme_size_multiplier: f64,
    pub extreme_max_positions: usize,
}

impl Default for MarketRegimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_symbol: "BTCUSDT".into(),
            extreme_volatility_ratio: 2.0,
            risk_off_threshold_offset: 5,
            risk_off_size_multiplier: 0.7,
            risk_off_max_positions: 2,
            extreme_threshold_offset: 10,
            extreme_size_multiplier: 0.5,
            extreme_max_positions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeConfig {
    pub htf: Timeframe,
    pub primary: Timeframe,
    /// Finest timeframe: drives replay steps and position updates.
    pub entry: Timeframe,
    /// Rows handed to the evaluator per timeframe.
    pub history_limit: usize,
}

impl Default for TimeframeConfig {
    fn default() -> Self {
        Self {
            htf: Timeframe::H4,
            primary: Timeframe::M15,
            entry: Timeframe::M5,
            history_limit: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_close_percents_not_summing_to_100() {
        let mut cfg = EngineConfig::default();
        cfg.take_profit.close_percents = [50.0, 30.0, 30.0];
        assert_eq!(cfg.validate(), Err(ConfigError::ClosePercentSum(110.0)));
    }

    #[test]
    fn rejects_unsorted_multiples() {
        let mut cfg = EngineConfig::default();
        cfg.take_profit.risk_multiples = [1.5, 1.0, 3.5];
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MultiplesNotIncreasing(_))
        ));
    }

    #[test]
    fn rejects_leverage_below_one() {
        let mut cfg = EngineConfig::default();
        cfg.risk.max_leverage = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "risk.max_leverage",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unsorted_leverage_tiers() {
        let mut cfg = EngineConfig::default();
        cfg.risk.leverage_tiers.reverse();
        assert_eq!(cfg.validate(), Err(ConfigError::LeverageTiers));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"risk": {"risk_per_trade": 0.005}, "near_tp": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(cfg.risk.risk_per_trade, 0.005);
        assert_eq!(cfg.risk.max_leverage, 15.0);
        assert!(!cfg.near_tp.enabled);
        assert_eq!(cfg.near_tp.threshold, 0.92);
        assert_eq!(cfg.timeframes.entry, Timeframe::M5);
    }
}
