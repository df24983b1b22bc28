//! Slow stochastic oscillator (k_period, k_smooth, d_period), e.g. (14, 3, 3).
//!
//! raw %K = 100 · (close - LL) / (HH - LL + EPSILON) over `k_period` bars,
//! %K = SMA(raw, k_smooth), %D = SMA(%K, d_period).

use super::sma::{rolling_max, rolling_min, sma};
use super::EPSILON;
use crate::domain::Bar;

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(bars: &[Bar], k_period: usize, k_smooth: usize, d_period: usize) -> StochasticOutput {
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let hh = rolling_max(&highs, k_period);
    let ll = rolling_min(&lows, k_period);

    let raw: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, b)| 100.0 * (b.close - ll[i]) / (hh[i] - ll[i] + EPSILON))
        .collect();
    let k = sma(&raw, k_smooth);
    let d = sma(&k, d_period);
    StochasticOutput { k, d }
}
