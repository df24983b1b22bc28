//! Price structure: support/resistance from rolling local extrema, and classic
//! floor-trader pivot points.

use serde::{Deserialize, Serialize};

use crate::domain::Bar;

/// Maximum levels reported on each side.
pub const MAX_LEVELS: usize = 5;

/// Levels closer than this fraction are merged into one.
const MERGE_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    /// Below the last close, ascending.
    pub supports: Vec<f64>,
    /// Above the last close, ascending.
    pub resistances: Vec<f64>,
}

impl SupportResistance {
    /// Highest support below the last close.
    pub fn nearest_support(&self) -> Option<f64> {
        self.supports.last().copied()
    }

    /// Lowest resistance above the last close.
    pub fn nearest_resistance(&self) -> Option<f64> {
        self.resistances.first().copied()
    }
}

/// Local extrema over a centred window of `window` bars (half on each side).
/// A bar only qualifies once the full half-window after it exists, so the
/// result for a prefix never depends on later bars.
pub fn support_resistance(bars: &[Bar], window: usize) -> SupportResistance {
    let Some(last) = bars.last() else {
        return SupportResistance::default();
    };
    let close = last.close;
    let half = (window / 2).max(1);
    if bars.len() < 2 * half + 1 {
        return SupportResistance::default();
    }

    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for i in half..bars.len() - half {
        let span = &bars[i - half..=i + half];
        let h = bars[i].high;
        let l = bars[i].low;
        if span.iter().all(|b| b.high <= h) {
            highs.push(h);
        }
        if span.iter().all(|b| b.low >= l) {
            lows.push(l);
        }
    }

    let resistances = nearest(
        merge(highs.into_iter().filter(|h| *h > close).collect()),
        close,
    );
    let supports = nearest(
        merge(lows.into_iter().filter(|l| *l < close).collect()),
        close,
    );
    SupportResistance {
        supports,
        resistances,
    }
}

fn merge(mut levels: Vec<f64>) -> Vec<f64> {
    levels.retain(|v| v.is_finite());
    levels.sort_by(f64::total_cmp);
    let mut merged: Vec<f64> = Vec::with_capacity(levels.len());
    for level in levels {
        match merged.last().copied() {
            Some(prev) if (level - prev) / prev <= MERGE_TOLERANCE => {}
            _ => merged.push(level),
        }
    }
    merged
}

/// The `MAX_LEVELS` levels closest to `close`, ascending.
fn nearest(mut levels: Vec<f64>, close: f64) -> Vec<f64> {
    levels.sort_by(|a, b| (a - close).abs().total_cmp(&(b - close).abs()));
    levels.truncate(MAX_LEVELS);
    levels.sort_by(f64::total_cmp);
    levels
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotPoints {
    pub pivot: f64,
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

/// Classic pivots from one completed bar.
pub fn pivot_points(bar: &Bar) -> PivotPoints {
    let (h, l, c) = (bar.high, bar.low, bar.close);
    let p = (h + l + c) / 3.0;
    PivotPoints {
        pivot: p,
        r1: 2.0 * p - l,
        s1: 2.0 * p - h,
        r2: p + (h - l),
        s2: p - (h - l),
        r3: h + 2.0 * (p - l),
        s3: l - 2.0 * (h - p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    fn zigzag(n: usize) -> Vec<Bar> {
        // Period-20 triangle wave between 90 and 110 ending mid-range.
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                let phase = (i % 20) as f64;
                if phase < 10.0 {
                    90.0 + phase * 2.0
                } else {
                    110.0 - (phase - 10.0) * 2.0
                }
            })
            .collect();
        make_bars(&closes)
    }

    #[test]
    fn finds_levels_on_both_sides() {
        let bars = zigzag(95);
        let sr = support_resistance(&bars, 20);
        assert!(!sr.supports.is_empty());
        assert!(!sr.resistances.is_empty());
        let close = bars.last().unwrap().close;
        assert!(sr.supports.iter().all(|s| *s < close));
        assert!(sr.resistances.iter().all(|r| *r > close));
        assert!(sr.supports.len() <= MAX_LEVELS && sr.resistances.len() <= MAX_LEVELS);
    }

    #[test]
    fn levels_are_ascending_and_merged() {
        let sr = support_resistance(&zigzag(200), 20);
        assert!(sr.resistances.windows(2).all(|w| w[0] < w[1]));
        // Every peak is the same price, so they merge into one level.
        assert_eq!(sr.resistances.len(), 1);
        assert_eq!(sr.nearest_resistance(), sr.resistances.first().copied());
    }

    #[test]
    fn short_series_has_no_levels() {
        let sr = support_resistance(&zigzag(10), 20);
        assert_eq!(sr, SupportResistance::default());
    }

    #[test]
    fn classic_pivots() {
        let bar = &make_bars(&[100.0, 100.0])[1]; // h 101, l 99, c 100
        let p = pivot_points(bar);
        assert_approx(p.pivot, 100.0, DEFAULT_EPSILON);
        assert_approx(p.r1, 101.0, DEFAULT_EPSILON);
        assert_approx(p.s1, 99.0, DEFAULT_EPSILON);
        assert_approx(p.r2, 102.0, DEFAULT_EPSILON);
        assert_approx(p.s2, 98.0, DEFAULT_EPSILON);
        assert_approx(p.r3, 103.0, DEFAULT_EPSILON);
        assert_approx(p.s3, 97.0, DEFAULT_EPSILON);
    }
}
