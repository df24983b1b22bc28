//! Commodity Channel Index: (TP - SMA(TP)) / (0.015 · mean deviation).

use super::sma::sma;
use super::EPSILON;
use crate::domain::Bar;

pub fn cci(bars: &[Bar], period: usize) -> Vec<f64> {
    let tp: Vec<f64> = bars.iter().map(Bar::typical_price).collect();
    let mean = sma(&tp, period);
    let n = bars.len();
    let mut result = vec![f64::NAN; n];
    for i in 0..n {
        if mean[i].is_nan() {
            continue;
        }
        let window = &tp[i + 1 - period..=i];
        let mean_dev = window.iter().map(|v| (v - mean[i]).abs()).sum::<f64>() / period as f64;
        result[i] = (tp[i] - mean[i]) / (0.015 * mean_dev + EPSILON);
    }
    result
}
