//! Setup quality score, 0–100.
//!
//! | Component        | Max |
//! |------------------|-----|
//! | HTF alignment    | 25  |
//! | Momentum         | 20  |
//! | RSI quality      | 15  |
//! | Entry location   | 20  |
//! | Volatility       | 10  |
//! | Volume           | 10  |

use crate::domain::Direction;
use serde::{Deserialize, Serialize};

/// HTF alignment strength as seen from the candidate direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Price and EMA 21/50/200 fully stacked in the trade direction.
    Stacked,
    /// EMA21 leads EMA50 in the trade direction.
    Leading,
    /// Trend agrees, structure loose.
    Agrees,
    Neutral,
    Against,
}

/// Readings the score is computed from. NaN readings score zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub direction: Direction,
    pub htf: Alignment,
    /// Primary MACD histogram, last and previous.
    pub histogram: f64,
    pub histogram_prev: f64,
    pub rsi: f64,
    pub price: f64,
    pub ema_fast: f64,
    pub atr: f64,
    pub atr_ratio: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub htf: u32,
    pub momentum: u32,
    pub rsi: u32,
    pub location: u32,
    pub volatility: u32,
    pub volume: u32,
}

impl ScoreBreakdown {
    pub fn compute(inputs: &ScoreInputs) -> Self {
        Self {
            htf: htf_points(inputs.htf),
            momentum: momentum_points(inputs.direction, inputs.histogram, inputs.histogram_prev),
            rsi: rsi_points(inputs.direction, inputs.rsi),
            location: location_points(inputs.price, inputs.ema_fast, inputs.atr),
            volatility: volatility_points(inputs.atr_ratio),
            volume: volume_points(inputs.volume_ratio),
        }
    }

    pub fn total(&self) -> u32 {
        (self.htf + self.momentum + self.rsi + self.location + self.volatility + self.volume)
            .min(100)
    }
}

pub fn htf_points(alignment: Alignment) -> u32 {
    match alignment {
        Alignment::Stacked => 25,
        Alignment::Leading => 18,
        Alignment::Agrees => 12,
        Alignment::Neutral => 10,
        Alignment::Against => 0,
    }
}

pub fn momentum_points(direction: Direction, histogram: f64, previous: f64) -> u32 {
    if histogram.is_nan() {
        return 0;
    }
    let signed = histogram * direction.sign();
    let rising = !previous.is_nan() && direction.favorable_move(previous, histogram) > 0.0;
    match (signed > 0.0, rising) {
        (true, true) => 20,
        (true, false) => 14,
        (false, true) => 8,
        (false, false) => 0,
    }
}

pub fn rsi_points(direction: Direction, rsi: f64) -> u32 {
    if rsi.is_nan() {
        return 0;
    }
    match direction {
        Direction::Long => match rsi {
            r if (30.0..50.0).contains(&r) => 15,
            r if (50.0..60.0).contains(&r) => 10,
            r if (25.0..30.0).contains(&r) || (60.0..65.0).contains(&r) => 5,
            _ => 0,
        },
        Direction::Short => match rsi {
            r if (50.0..=70.0).contains(&r) => 15,
            r if (40.0..50.0).contains(&r) => 10,
            r if (35.0..40.0).contains(&r) || (70.0..=75.0).contains(&r) => 5,
            _ => 0,
        },
    }
}

/// Closer to EMA21, measured in ATR, is better.
pub fn location_points(price: f64, ema_fast: f64, atr: f64) -> u32 {
    if !(price.is_finite() && ema_fast.is_finite() && atr.is_finite()) || atr <= 0.0 {
        return 0;
    }
    match (price - ema_fast).abs() / atr {
        d if d < 0.3 => 20,
        d if d < 0.6 => 15,
        d if d < 1.0 => 10,
        _ => 5,
    }
}

pub fn volatility_points(atr_ratio: f64) -> u32 {
    match atr_ratio {
        r if (0.9..=1.3).contains(&r) => 10,
        r if (0.7..=1.6).contains(&r) => 7,
        r if (0.5..=2.0).contains(&r) => 3,
        _ => 0,
    }
}

pub fn volume_points(volume_ratio: f64) -> u32 {
    match volume_ratio {
        r if r > 1.5 => 10,
        r if r > 1.2 => 7,
        r if r > 1.0 => 5,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ideal_long_scores_full_marks() {
        let inputs = ScoreInputs {
            direction: Direction::Long,
            htf: Alignment::Stacked,
            histogram: 0.5,
            histogram_prev: 0.3,
            rsi: 45.0,
            price: 100.1,
            ema_fast: 100.0,
            atr: 1.0,
            atr_ratio: 1.1,
            volume_ratio: 1.8,
        };
        let b = ScoreBreakdown::compute(&inputs);
        assert_eq!(b.total(), 100);
    }

    #[test]
    fn momentum_mirrors_for_shorts() {
        assert_eq!(momentum_points(Direction::Short, -0.5, -0.3), 20);
        assert_eq!(momentum_points(Direction::Short, -0.2, -0.3), 14);
        assert_eq!(momentum_points(Direction::Short, 0.1, 0.3), 8);
        assert_eq!(momentum_points(Direction::Long, -0.1, 0.2), 0);
        assert_eq!(momentum_points(Direction::Long, f64::NAN, 0.2), 0);
    }

    #[test]
    fn rsi_bands() {
        assert_eq!(rsi_points(Direction::Long, 40.0), 15);
        assert_eq!(rsi_points(Direction::Long, 55.0), 10);
        assert_eq!(rsi_points(Direction::Long, 62.0), 5);
        assert_eq!(rsi_points(Direction::Long, 75.0), 0);
        assert_eq!(rsi_points(Direction::Short, 60.0), 15);
        assert_eq!(rsi_points(Direction::Short, 45.0), 10);
        assert_eq!(rsi_points(Direction::Short, 20.0), 0);
    }

    #[test]
    fn location_in_atr() {
        assert_eq!(location_points(100.2, 100.0, 1.0), 20);
        assert_eq!(location_points(100.5, 100.0, 1.0), 15);
        assert_eq!(location_points(99.2, 100.0, 1.0), 10);
        assert_eq!(location_points(102.0, 100.0, 1.0), 5);
        assert_eq!(location_points(102.0, 100.0, 0.0), 0);
    }

    #[test]
    fn volatility_and_volume_bands() {
        assert_eq!(volatility_points(1.0), 10);
        assert_eq!(volatility_points(1.5), 7);
        assert_eq!(volatility_points(1.9), 3);
        assert_eq!(volatility_points(f64::NAN), 0);
        assert_eq!(volume_points(1.6), 10);
        assert_eq!(volume_points(1.3), 7);
        assert_eq!(volume_points(1.1), 5);
        assert_eq!(volume_points(0.8), 0);
    }
}
