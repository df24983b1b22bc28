//! Property tests for the quantified invariants of the pure pipeline.
//!
//! 1. Bar sanity: validated bars keep low <= min(open, close) <= max(open, close) <= high
//! 2. Levels: stop < entry < tp1 <= tp2, sl_pct in [1.5, 5], rr1 >= 2
//! 3. Score bounds: 0..=100 and every component within its cap
//! 4. Indicator idempotence: two computations are bit-identical

use bistlab_core::indicators::IndicatorFrame;
use bistlab_core::levels::{plan_with_profile, SECTOR_PROFILES};
use bistlab_core::{Bar, GateState, IndicatorSnapshot, Scorer};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_returns(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-0.06..0.06_f64, len)
}

fn arb_bars(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Bar>> {
    (
        10.0..500.0_f64,
        arb_returns(len),
        prop::collection::vec((0.0..0.03_f64, 0.0..0.03_f64, 100u64..1_000_000), 300),
    )
        .prop_map(|(start, returns, noise)| {
            let t0 = Utc.with_ymd_and_hms(2023, 1, 2, 7, 0, 0).unwrap();
            let mut price = start;
            returns
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let (up, down, volume) = noise[i % noise.len()];
                    let open = price;
                    let close = (price * (1.0 + r)).max(0.5);
                    price = close;
                    Bar {
                        timestamp: t0 + Duration::days(i as i64),
                        open,
                        high: open.max(close) * (1.0 + up),
                        low: open.min(close) * (1.0 - down),
                        close,
                        volume,
                    }
                })
                .collect()
        })
}

// ── 1. Bar sanity ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn generated_bars_are_sane(bars in arb_bars(1..80)) {
        for bar in &bars {
            prop_assert!(bar.validate().is_ok());
            prop_assert!(bar.low <= bar.open.min(bar.close));
            prop_assert!(bar.open.max(bar.close) <= bar.high);
        }
    }

    #[test]
    fn inverted_bar_is_rejected(low in 10.0..100.0_f64, gap in 0.01..5.0_f64) {
        let bar = Bar {
            timestamp: Utc::now(),
            open: low + gap,
            high: low,
            low: low + gap / 2.0,
            close: low + gap,
            volume: 1,
        };
        prop_assert!(bar.validate().is_err());
    }
}

// ── 2. Levels invariants ─────────────────────────────────────────────

proptest! {
    #[test]
    fn levels_hold_for_any_atr_and_profile(
        close in 1.0..1_000.0_f64,
        atr_frac in prop::option::of(0.0..0.2_f64),
        ema21_frac in prop::option::of(0.9..1.1_f64),
        low_frac in prop::option::of(0.85..1.05_f64),
        profile_idx in 0..SECTOR_PROFILES.len(),
    ) {
        let profile = &SECTOR_PROFILES[profile_idx];
        let bar = Bar {
            timestamp: Utc::now(),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000,
        };
        let mut snap = IndicatorSnapshot::minimal(bar.timestamp, close, atr_frac.map(|f| f * close));
        snap.trend.ema21 = ema21_frac.map(|f| f * close);
        snap.structure.recent_low = low_frac.map(|f| f * close);

        let levels = plan_with_profile(profile.name, profile, &bar, &snap);
        let violated = levels.check_invariants();
        prop_assert!(violated.is_empty(), "{:?} for {:?}", violated, levels);
        prop_assert!(levels.rr1 >= 2.5 && levels.rr2 >= 4.0);
        prop_assert_eq!(levels.max_hold_days, profile.max_hold_days);
    }
}

// ── 3. Score bounds ──────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn score_within_caps(bars in arb_bars(40..260), market_ok: bool, time_safe: bool) {
        let snap = IndicatorSnapshot::from_bars(&bars).unwrap();
        let score = Scorer::score(&bars, &snap, GateState { market_ok, time_safe });
        prop_assert!(score.total <= 100);
        prop_assert!(score.components_within_caps());
        if !(market_ok && time_safe) {
            prop_assert!(!score.is_buy());
        }
    }
}

// ── 4. Indicator idempotence ─────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn snapshots_are_reproducible(bars in arb_bars(30..220)) {
        let copy = bars.clone();
        let first = IndicatorFrame::compute(&bars);
        let second = IndicatorFrame::compute(&bars);
        for i in (0..bars.len()).step_by(7) {
            let a = first.snapshot_at(i).unwrap();
            let b = second.snapshot_at(i).unwrap();
            prop_assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&b).unwrap()
            );
        }
        prop_assert_eq!(bars, copy);
    }
}
