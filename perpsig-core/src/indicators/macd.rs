//! MACD: difference of two EMAs, its signal EMA, and the histogram.

use crate::indicators::ema::ema;

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();

    // The signal EMA seeds from the first fully valid MACD values.
    let first_valid = line.iter().position(|v| !v.is_nan()).unwrap_or(line.len());
    let mut signal = vec![f64::NAN; line.len()];
    let tail = ema(&line[first_valid..], signal_period);
    signal[first_valid..].copy_from_slice(&tail);

    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn warmup_is_nan() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let m = macd(&closes, 12, 26, 9);
        assert!(m.line[24].is_nan());
        assert!(!m.line[25].is_nan());
        assert!(m.signal[32].is_nan());
        assert!(!m.signal[33].is_nan());
        assert!(!m.histogram[33].is_nan());
    }

    #[test]
    fn flat_series_is_zero() {
        let m = macd(&[50.0; 60], 12, 26, 9);
        assert_approx(m.line[59], 0.0, DEFAULT_EPSILON);
        assert_approx(m.histogram[59], 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rising_series_has_positive_line() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&closes, 12, 26, 9);
        assert!(m.line[59] > 0.0);
    }

    #[test]
    fn short_series_all_nan() {
        let m = macd(&[1.0, 2.0, 3.0], 12, 26, 9);
        assert!(m.histogram.iter().all(|v| v.is_nan()));
    }
}
