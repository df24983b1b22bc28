//! On-Balance Volume. Starts at 0; adds the bar volume on an up close,
//! subtracts it on a down close. Monotonic only when every close rises.

use crate::domain::Bar;

pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut result = Vec::with_capacity(bars.len());
    let mut running = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            let prev = bars[i - 1].close;
            if bar.close.is_nan() || prev.is_nan() {
                running = f64::NAN;
            } else if bar.close > prev {
                running += bar.volume as f64;
            } else if bar.close < prev {
                running -= bar.volume as f64;
            }
        }
        result.push(running);
    }
    result
}
