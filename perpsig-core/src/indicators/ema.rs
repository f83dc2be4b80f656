//! Exponential Moving Average (EMA).
//!
//! EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: EMA[period-1] = SMA of the first `period` values.

/// EMA of an arbitrary series. The first `period - 1` values are NaN.
///
/// A NaN inside the seed window makes the whole output NaN; a NaN after the
/// seed taints every later value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let seed_window = &values[..period];
    if seed_window.iter().any(|v| v.is_nan()) {
        return result;
    }
    let mut prev = seed_window.iter().sum::<f64>() / period as f64;
    result[period - 1] = prev;

    let alpha = 2.0 / (period as f64 + 1.0);
    for i in period..n {
        if values[i].is_nan() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}
