//! Indicator engine.
//!
//! Every indicator is a pure function over a bar (or value) slice returning a
//! `Vec<f64>` aligned to the input. Warmup positions are `NaN`; a `NaN` input
//! taints every value whose window contains it. Inputs are never mutated, so
//! computing twice yields bit-identical output.
//!
//! [`IndicatorSnapshot`] projects one bar of the full indicator frame into
//! `Option<f64>` fields; `NaN` becomes `None`, never zero.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod cci;
pub mod ema;
pub mod macd;
pub mod mfi;
pub mod obv;
pub mod rsi;
pub mod sma;
pub mod snapshot;
pub mod stochastic;
pub mod structure;
pub mod vwap;

pub use adx::{adx, AdxOutput};
pub use atr::{atr, true_range};
pub use bollinger::{bollinger, BollingerBands};
pub use cci::cci;
pub use ema::ema;
pub use macd::{macd, MacdOutput};
pub use mfi::mfi;
pub use obv::obv;
pub use rsi::rsi;
pub use sma::{rolling_max, rolling_min, rolling_std, sma};
pub use snapshot::{
    IndicatorFrame, IndicatorSnapshot, MomentumIndicators, PriceStructure, TrendIndicators,
    VolatilityIndicators, VolumeIndicators,
};
pub use stochastic::{stochastic, StochasticOutput};
pub use structure::{pivot_points, support_resistance, PivotPoints, SupportResistance};
pub use vwap::vwap;

/// Division guard added wherever a denominator can be zero.
pub const EPSILON: f64 = 1e-10;

/// Finite value at `i`, else `None`.
pub fn value_at(values: &[f64], i: usize) -> Option<f64> {
    values.get(i).copied().filter(|v| v.is_finite())
}

/// Apply `f` to every full window of `period` values. Windows containing
/// `NaN` produce `NaN`.
pub(crate) fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = f(window);
    }
    result
}

/// Create synthetic bars from close prices for testing.
///
/// open = prev_close (or close for first bar),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<crate::domain::Bar> {
    use crate::domain::Bar;
    use chrono::TimeZone;
    let start = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: start + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
