//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|); the first bar
//! has no previous close and uses high - low.
//! ATR(n) is the simple mean of the last `n` true ranges, valid from index n-1.

use super::sma::sma;
use crate::domain::Bar;

pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let hl = bar.high - bar.low;
            if i == 0 {
                return hl;
            }
            let prev_close = bars[i - 1].close;
            hl.max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    sma(&true_range(bars), period)
}
