//! Bollinger Bands: middle = SMA(n), upper/lower = middle ± k·stdev(n).
//!
//! Uses the sample standard deviation. `%b` and width are derived per bar with
//! the division guard.

use super::sma::{rolling_std, sma};
use super::EPSILON;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    /// Position of `close` inside the band: 0 at the lower band, 1 at the upper.
    pub fn percent_b(&self, i: usize, close: f64) -> f64 {
        (close - self.lower[i]) / (self.upper[i] - self.lower[i] + EPSILON)
    }

    /// Band width relative to the middle band.
    pub fn width(&self, i: usize) -> f64 {
        (self.upper[i] - self.lower[i]) / (self.middle[i] + EPSILON)
    }
}

pub fn bollinger(closes: &[f64], period: usize, k: f64) -> BollingerBands {
    let middle = sma(closes, period);
    let std = rolling_std(closes, period);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + k * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - k * s).collect();
    BollingerBands {
        upper,
        middle,
        lower,
    }
}
