//! Relative Strength Index (RSI).
//!
//! Wilder smoothing of average gains and losses, seeded with the simple mean of
//! the first `period` changes; first valid value at index `period`.
//! RS = (avg_gain + EPSILON) / (avg_loss + EPSILON), so a flat series reads 50.

use super::EPSILON;

pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    let change = |i: usize| closes[i] - closes[i - 1];

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = change(i);
        if ch.is_nan() {
            return result;
        }
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let ch = change(i);
        if ch.is_nan() {
            return result;
        }
        let gain = ch.max(0.0);
        let loss = (-ch).max(0.0);
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    let rs = (avg_gain + EPSILON) / (avg_loss + EPSILON);
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::assert_approx;

    #[test]
    fn first_value_at_period() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 4) as f64).collect();
        let r = rsi(&closes, 14);
        assert!(r[..14].iter().all(|v| v.is_nan()));
        assert!(r[14].is_finite());
    }

    #[test]
    fn flat_series_reads_fifty() {
        let r = rsi(&[20.0; 40], 14);
        for v in &r[14..] {
            assert_approx(*v, 50.0, 1e-6);
        }
    }

    #[test]
    fn all_gains_approach_hundred() {
        let r = rsi(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0], 3);
        assert_approx(r[3], 100.0, 1e-6);
    }

    #[test]
    fn all_losses_approach_zero() {
        let r = rsi(&[105.0, 104.0, 103.0, 102.0, 101.0, 100.0], 3);
        assert_approx(r[3], 0.0, 1e-6);
    }

    #[test]
    fn rsi_mixed() {
        // Changes: +0.34, -0.25, -0.48 -> avg_gain 0.34/3, avg_loss 0.73/3
        let r = rsi(&[44.0, 44.34, 44.09, 43.61, 44.33], 3);
        let expected = 100.0 - 100.0 / (1.0 + 0.34 / 0.73);
        assert_approx(r[3], expected, 1e-6);
        // Wilder step with +0.72
        let g = (0.34 / 3.0) * 2.0 / 3.0 + 0.72 / 3.0;
        let l = (0.73 / 3.0) * 2.0 / 3.0;
        assert_approx(r[4], 100.0 - 100.0 / (1.0 + g / l), 1e-6);
    }

    #[test]
    fn bounded_zero_to_hundred() {
        let closes: Vec<f64> = (0..100).map(|i| 50.0 + ((i * 7) % 13) as f64).collect();
        for v in rsi(&closes, 14).into_iter().filter(|v| v.is_finite()) {
            assert!((0.0..=100.0).contains(&v));
        }
    }
}
