//! Volume-weighted average price, cumulative from the first bar of the slice.

use crate::domain::Bar;

pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut pv = 0.0;
    let mut vol = 0.0;
    bars.iter()
        .map(|bar| {
            pv += bar.typical_price() * bar.volume as f64;
            vol += bar.volume as f64;
            if vol > 0.0 {
                pv / vol
            } else {
                // No volume traded yet: VWAP is undefined.
                f64::NAN
            }
        })
        .collect()
}
