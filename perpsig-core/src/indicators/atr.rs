//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (alpha = 1/period), seeded from TR[1..=period].

use crate::domain::Candle;

/// True Range series. TR[0] = high - low (no previous close).
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(candles.len());
    for (i, c) in candles.iter().enumerate() {
        if i == 0 {
            tr.push(c.high - c.low);
            continue;
        }
        let pc = candles[i - 1].close;
        tr.push((c.high - c.low).max((c.high - pc).abs()).max((c.low - pc).abs()));
    }
    tr
}

/// Wilder smoothing. Seeds with the mean of the first `period` consecutive
/// non-NaN values; a NaN after the seed ends the series.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let Some(seed_start) =
        (0..=n - period).find(|&i| values[i..i + period].iter().all(|v| !v.is_nan()))
    else {
        return result;
    };
    let seed_end = seed_start + period;
    let mut prev = values[seed_start..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = prev;

    let alpha = 1.0 / period as f64;
    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// ATR series. The first `period` values are NaN.
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut tr = true_range(candles);
    // TR[0] lacks a previous close; start the seed at TR[1].
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    wilder_smooth(&tr, period)
}
