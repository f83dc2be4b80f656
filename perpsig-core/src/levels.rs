//! Initial stop-loss and take-profit ladder.

use crate::config::{StopConfig, TakeProfitConfig};
use crate::domain::{Candle, Direction, Regime, TakeProfitLadder};
use crate::market::structure::swing_for;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LevelError {
    #[error("ATR must be positive to place a stop, got {0}")]
    InvalidAtr(f64),

    #[error("stop {stop} collapses onto entry {entry} after rounding")]
    DegenerateStop { entry: f64, stop: f64 },
}

/// Round a price to a precision that scales with its magnitude.
pub fn smart_round(price: f64) -> f64 {
    let decimals = match price.abs() {
        p if p < 0.01 => 8,
        p if p < 0.1 => 6,
        p if p < 1.0 => 5,
        p if p < 10.0 => 4,
        p if p < 100.0 => 3,
        _ => 2,
    };
    let scale = 10f64.powi(decimals);
    (price * scale).round() / scale
}

#[derive(Debug, Clone)]
pub struct StopTpCalculator {
    stops: StopConfig,
    take_profit: TakeProfitConfig,
}

impl StopTpCalculator {
    pub fn new(stops: StopConfig, take_profit: TakeProfitConfig) -> Self {
        Self { stops, take_profit }
    }

    /// Tighter of the ATR stop and the swing stop, capped at
    /// `max_stop_atr` × ATR from entry.
    ///
    /// `structure` is the primary-timeframe window the swing is read from.
    pub fn stop_loss(
        &self,
        direction: Direction,
        entry: f64,
        atr: f64,
        structure: &[Candle],
    ) -> Result<f64, LevelError> {
        if !atr.is_finite() || atr <= 0.0 {
            return Err(LevelError::InvalidAtr(atr));
        }
        let sign = direction.sign();
        let atr_stop = entry - sign * self.stops.atr_multiplier * atr;
        let swing_stop = swing_for(structure, self.stops.swing_lookback, direction)
            .map(|swing| swing - sign * self.stops.swing_buffer_atr * atr)
            .unwrap_or(atr_stop);

        let max_distance = self.stops.max_stop_atr * atr;
        let capped = entry - sign * max_distance;
        let mut stop = direction.tighter(atr_stop, swing_stop);
        if direction.favorable_move(stop, entry) > max_distance {
            stop = capped;
        }
        // A swing beyond entry would put the stop on the wrong side.
        if direction.favorable_move(stop, entry) <= 0.0 {
            stop = capped;
        }

        let stop = smart_round(stop);
        if direction.favorable_move(stop, entry) <= 0.0 {
            return Err(LevelError::DegenerateStop { entry, stop });
        }
        Ok(stop)
    }

    /// Regime scale on the configured risk multiples.
    pub fn regime_scale(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Trending => 1.0,
            Regime::HighVolatility => self.take_profit.high_volatility_scale,
            Regime::Choppy | Regime::LowVolatility => self.take_profit.defensive_scale,
        }
    }

    pub fn take_profits(
        &self,
        direction: Direction,
        entry: f64,
        stop: f64,
        regime: Regime,
    ) -> TakeProfitLadder {
        let risk = (entry - stop).abs();
        let scale = self.regime_scale(regime);
        let tp = &self.take_profit;
        let level = |i: usize| {
            let multiple = tp.risk_multiples[i] * scale;
            (
                smart_round(entry + direction.sign() * risk * multiple),
                tp.close_percents[i],
                multiple,
            )
        };
        TakeProfitLadder::new([level(0), level(1), level(2)])
    }
}

impl Default for StopTpCalculator {
    fn default() -> Self {
        Self::new(StopConfig::default(), TakeProfitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TpLevel;
    use crate::indicators::{assert_approx, make_ohlc};

    #[test]
    fn smart_round_by_magnitude() {
        assert_eq!(smart_round(0.001234567891), 0.00123457);
        assert_eq!(smart_round(0.0123456789), 0.012346);
        assert_eq!(smart_round(0.123456789), 0.12346);
        assert_eq!(smart_round(1.23456789), 1.2346);
        assert_eq!(smart_round(12.3456789), 12.346);
        assert_eq!(smart_round(123.456789), 123.46);
    }

    #[test]
    fn swing_stop_is_tighter_for_long() {
        // swing low 98.5, buffer 0.2 -> 98.3; ATR stop 100 - 2.5 = 97.5
        let window = make_ohlc(&[(100.0, 101.0, 98.5, 100.0), (100.0, 101.0, 99.0, 100.0)]);
        let stop = StopTpCalculator::default()
            .stop_loss(Direction::Long, 100.0, 1.0, &window)
            .unwrap();
        assert_approx(stop, 98.3, 1e-9);
    }

    #[test]
    fn wide_swing_capped_at_two_atr() {
        let window = make_ohlc(&[(100.0, 101.0, 90.0, 100.0)]);
        let calc = StopTpCalculator::default();
        // swing 90 - 0.2 and ATR 97.5: tighter is 97.5, distance 2.5 > 2
        let stop = calc.stop_loss(Direction::Long, 100.0, 1.0, &window).unwrap();
        assert_approx(stop, 98.0, 1e-9);
        let window = make_ohlc(&[(100.0, 110.0, 99.0, 100.0)]);
        let stop = calc.stop_loss(Direction::Short, 100.0, 1.0, &window).unwrap();
        assert_approx(stop, 102.0, 1e-9);
    }

    #[test]
    fn swing_beyond_entry_falls_back() {
        // every low sits above entry
        let window = make_ohlc(&[(105.0, 106.0, 104.0, 105.0)]);
        let stop = StopTpCalculator::default()
            .stop_loss(Direction::Long, 100.0, 1.0, &window)
            .unwrap();
        assert_approx(stop, 98.0, 1e-9);
    }

    #[test]
    fn zero_atr_rejected() {
        let err = StopTpCalculator::default()
            .stop_loss(Direction::Long, 100.0, 0.0, &[])
            .unwrap_err();
        assert_eq!(err, LevelError::InvalidAtr(0.0));
    }

    #[test]
    fn trending_ladder_full_multiples() {
        let ladder =
            StopTpCalculator::default().take_profits(Direction::Long, 100.0, 98.0, Regime::Trending);
        assert_approx(ladder.get(TpLevel::Tp1).price, 103.0, 1e-9);
        assert_approx(ladder.get(TpLevel::Tp2).price, 105.0, 1e-9);
        assert_approx(ladder.get(TpLevel::Tp3).price, 107.0, 1e-9);
        assert_approx(ladder.total_close_percent(), 100.0, 1e-9);
        assert!(ladder.validate(Direction::Long, 100.0).is_ok());
    }

    #[test]
    fn regime_scales_ladder() {
        let calc = StopTpCalculator::default();
        let hv = calc.take_profits(Direction::Short, 100.0, 102.0, Regime::HighVolatility);
        assert_approx(hv.get(TpLevel::Tp1).price, 97.6, 1e-9);
        let choppy = calc.take_profits(Direction::Long, 100.0, 98.0, Regime::Choppy);
        assert_approx(choppy.get(TpLevel::Tp1).price, 101.8, 1e-9);
        assert_approx(choppy.get(TpLevel::Tp3).risk_multiple, 2.1, 1e-9);
    }
}
