//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (n + 1).
//! Seed: simple mean of the first `n` values, starting at the first non-NaN
//! input, so an EMA of a series with a NaN warmup prefix (the MACD line) works.
//! A NaN after the seed taints every later value.

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }

    let Some(start) = values.iter().position(|v| !v.is_nan()) else {
        return result;
    };
    let seed_end = start + period;
    if seed_end > n {
        return result;
    }

    let seed_window = &values[start..seed_end];
    if seed_window.iter().any(|v| v.is_nan()) {
        return result;
    }
    let seed = seed_window.iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        let next = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = next;
        prev = next;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn ema_period_1_equals_input() {
        let r = ema(&[100.0, 200.0, 300.0], 1);
        assert_eq!(r, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn ema_3_known_values() {
        // alpha = 0.5, seed SMA(10,11,12) = 11
        let r = ema(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert!(r[0].is_nan());
        assert!(r[1].is_nan());
        assert_approx(r[2], 11.0, DEFAULT_EPSILON);
        assert_approx(r[3], 12.0, DEFAULT_EPSILON);
        assert_approx(r[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_of_constant_is_exact() {
        let r = ema(&[10.0; 10], 3);
        assert_eq!(r[9], 10.0);
    }

    #[test]
    fn ema_skips_nan_prefix() {
        let r = ema(&[f64::NAN, f64::NAN, 2.0, 4.0, 6.0], 2);
        assert!(r[2].is_nan());
        assert_approx(r[3], 3.0, DEFAULT_EPSILON);
        // alpha = 2/3: 2/3*6 + 1/3*3 = 5
        assert_approx(r[4], 5.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_nan_in_seed_produces_all_nan() {
        let r = ema(&[10.0, 11.0, f64::NAN, 13.0, 14.0], 3);
        // Seed starts at 0; window [10, 11, NaN] is tainted.
        assert!(r.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_nan_after_seed_propagates() {
        let r = ema(&[10.0, 11.0, 12.0, f64::NAN, 14.0], 3);
        assert_approx(r[2], 11.0, DEFAULT_EPSILON);
        assert!(r[3].is_nan());
        assert!(r[4].is_nan());
    }
}
