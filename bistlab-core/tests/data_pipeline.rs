//! Market data adapters composed the way the scanner uses them:
//! Fallback(Caching(provider)) feeding the indicator pipeline.

use std::sync::Arc;
use std::thread;

use bistlab_core::data::{
    CacheConfig, CachingSource, DataError, FallbackSource, MarketDataSource, StaticSource,
    SyntheticSource,
};
use bistlab_core::{
    Clock, DataSource, ExchangeCalendar, GateState, IndicatorSnapshot, Interval, LevelPlanner,
    ManualClock, Period, Scorer,
};
use chrono::{Duration, TimeZone, Utc};

fn clock() -> Arc<ManualClock> {
    // Monday 2024-06-03 15:00 Istanbul.
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap(),
    ))
}

fn synthetic(clock: Arc<ManualClock>) -> SyntheticSource {
    SyntheticSource::new(clock, ExchangeCalendar::bist())
}

#[test]
fn synthetic_series_is_deterministic_and_labelled() {
    let clock = clock();
    let a = synthetic(clock.clone())
        .fetch_bars("THYAO", Interval::OneDay, Period::OneYear)
        .unwrap();
    let b = synthetic(clock)
        .fetch_bars("thyao.is", Interval::OneDay, Period::OneYear)
        .unwrap();
    assert_eq!(a, b);
    assert_eq!(a.source(), DataSource::Synthetic);
    assert!(a.len() > 200, "one year of trading days, got {}", a.len());
    assert!(a.bars().iter().all(|bar| bar.validate().is_ok()));
}

#[test]
fn fallback_substitutes_synthetic_on_outage() {
    let clock = clock();
    let upstream = StaticSource::new();
    upstream.fail_with("ASELS", DataError::unavailable("ASELS", "outage"));
    let source = FallbackSource::new(upstream, synthetic(clock));

    let series = source
        .fetch_bars("ASELS", Interval::OneDay, Period::SixMonths)
        .unwrap();
    assert!(series.source() == DataSource::Synthetic);
}

#[test]
fn fallback_never_masks_invalid_ticker() {
    let clock = clock();
    let upstream = StaticSource::new();
    upstream.fail_with("NOPE", DataError::InvalidTicker {
        ticker: "NOPE".into(),
    });
    let source = FallbackSource::new(upstream, synthetic(clock));
    assert!(source
        .fetch_bars("NOPE", Interval::OneDay, Period::OneMonth)
        .is_err());
}

#[test]
fn cache_hits_within_ttl_are_equal_across_threads() {
    let clock = clock();
    let upstream = Arc::new(StaticSource::from_series([synthetic(clock.clone())
        .fetch_bars("EREGL", Interval::OneDay, Period::OneYear)
        .unwrap()]));
    let cache = Arc::new(CachingSource::new(
        Arc::clone(&upstream),
        clock.clone() as Arc<dyn Clock>,
        CacheConfig::default(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                cache
                    .fetch_bars("EREGL", Interval::OneDay, Period::OneYear)
                    .unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    // Per-key fetch lock: only the first caller reaches the provider.
    assert_eq!(upstream.fetch_count(), 1);
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 7);

    clock.advance(Duration::seconds(3_601));
    cache
        .fetch_bars("EREGL", Interval::OneDay, Period::OneYear)
        .unwrap();
    assert_eq!(upstream.fetch_count(), 2);
}

#[test]
fn synthetic_series_runs_through_the_pipeline() {
    let clock = clock();
    let planner = LevelPlanner::default();
    let source = synthetic(clock);
    for ticker in ["AKBNK", "BIMAS", "TUPRS", "KONTR"] {
        let series = source
            .fetch_bars(ticker, Interval::OneDay, Period::OneYear)
            .unwrap();
        let bars = series.bars();
        let snapshot = IndicatorSnapshot::from_bars(bars).unwrap();
        let score = Scorer::score(bars, &snapshot, GateState::open());
        assert!(score.components_within_caps());
        let levels = planner.plan(ticker, &bars[bars.len() - 1], &snapshot);
        assert!(levels.check_invariants().is_empty(), "{ticker}: {levels:?}");
    }
}
