//! Money Flow Index over `period` bars.
//!
//! Money flow = typical price · volume, positive when the typical price rose.
//! MFI = 100 - 100 / (1 + (pos + EPSILON) / (neg + EPSILON)); first value at
//! index `period`. A flat window reads 50.

use super::EPSILON;
use crate::domain::Bar;

pub fn mfi(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    let tp: Vec<f64> = bars.iter().map(Bar::typical_price).collect();
    let mut pos = vec![0.0; n];
    let mut neg = vec![0.0; n];
    for i in 1..n {
        let flow = tp[i] * bars[i].volume as f64;
        if tp[i] > tp[i - 1] {
            pos[i] = flow;
        } else if tp[i] < tp[i - 1] {
            neg[i] = flow;
        }
    }

    for i in period..n {
        let p: f64 = pos[i + 1 - period..=i].iter().sum();
        let m: f64 = neg[i + 1 - period..=i].iter().sum();
        if p.is_nan() || m.is_nan() {
            continue;
        }
        result[i] = 100.0 - 100.0 / (1.0 + (p + EPSILON) / (m + EPSILON));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars};

    #[test]
    fn flat_series_reads_fifty() {
        let r = mfi(&make_bars(&[15.0; 30]), 14);
        assert!(r[13].is_nan());
        assert_approx(r[14], 50.0, 1e-9);
    }

    #[test]
    fn only_inflows_approach_hundred() {
        let closes: Vec<f64> = (0..30).map(|i| 15.0 + i as f64).collect();
        let r = mfi(&make_bars(&closes), 14);
        assert!(r[29] > 99.99);
    }

    #[test]
    fn bounded() {
        let closes: Vec<f64> = (0..60).map(|i| 15.0 + (i as f64 * 0.9).sin() * 3.0).collect();
        for v in mfi(&make_bars(&closes), 14).into_iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(&v));
        }
    }
}
