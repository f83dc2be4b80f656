//! ADX: Average Directional Index (Wilder).
//!
//! +DM/-DM from consecutive candles, Wilder-smoothed with TR into +DI/-DI,
//! DX = 100 * |+DI - -DI| / (+DI + -DI), ADX = Wilder-smoothed DX.

use crate::domain::Candle;
use crate::indicators::atr::{true_range, wilder_smooth};

pub fn adx(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }

    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        if up.is_nan() || down.is_nan() {
            continue;
        }
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let mut tr = true_range(candles);
    tr[0] = f64::NAN;
    let tr_s = wilder_smooth(&tr, period);
    let plus_s = wilder_smooth(&plus_dm, period);
    let minus_s = wilder_smooth(&minus_dm, period);

    let dx: Vec<f64> = (0..n)
        .map(|i| {
            if tr_s[i].is_nan() || plus_s[i].is_nan() || minus_s[i].is_nan() || tr_s[i] == 0.0 {
                return f64::NAN;
            }
            let plus_di = 100.0 * plus_s[i] / tr_s[i];
            let minus_di = 100.0 * minus_s[i] / tr_s[i];
            let sum = plus_di + minus_di;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / sum
            }
        })
        .collect();

    wilder_smooth(&dx, period)
}
