//! Simple Moving Average (SMA).
//!
//! Rolling mean over `period` values; first valid value at index period-1.

/// Rolling mean. Any NaN inside a window makes that window's value NaN.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for (i, window) in values.windows(period).enumerate() {
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i + period - 1] = window.iter().sum::<f64>() / period as f64;
    }
    result
}
