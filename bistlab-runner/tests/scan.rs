//! Full universe scans over in-memory and synthetic sources.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bistlab_core::data::{DataError, MarketDataSource, StaticSource, SyntheticSource};
use bistlab_core::{
    Classified, Clock, ErrorKind, ExchangeCalendar, Interval, ManualClock, Period, Recommendation,
    Series, TradingPhase, Universe,
};
use bistlab_runner::{HybridSignalGenerator, ScanConfig, ScanError};
use chrono::{TimeZone, Utc};

/// Monday 2024-06-03, 13:00 Istanbul (monitoring session).
fn monitoring_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
    ))
}

fn synthetic_generator(clock: Arc<ManualClock>, config: ScanConfig) -> HybridSignalGenerator {
    let source = Arc::new(SyntheticSource::new(
        clock.clone() as Arc<dyn Clock>,
        ExchangeCalendar::bist(),
    ));
    HybridSignalGenerator::new(
        source,
        clock,
        ExchangeCalendar::bist(),
        Universe::bist30(),
        config,
    )
}

#[test]
fn synthetic_scan_respects_limits_and_labels() {
    let gen = synthetic_generator(monitoring_clock(), ScanConfig::default());
    let picks = gen.daily_picks(5, 70);

    assert_eq!(picks.scanned, 30);
    assert!(picks.failures.is_empty(), "{:?}", picks.failures);
    assert_eq!(picks.phase, TradingPhase::Monitoring);
    assert!(picks.picks.len() <= 5);
    assert!(picks.picks.iter().all(|s| s.score.total >= 70));
    assert!(picks.picks.iter().all(|s| s.is_synthetic()));
    assert!(picks
        .picks
        .windows(2)
        .all(|w| w[0].score.total >= w[1].score.total));

    let sectors: HashSet<&str> = picks.picks.iter().map(|s| s.sector.as_str()).collect();
    assert_eq!(sectors.len(), picks.picks.len());

    for s in &picks.picks {
        assert!(s.levels.check_invariants().is_empty(), "{}: {:?}", s.ticker, s.levels);
    }
    assert!(picks.warnings.iter().any(|w| w.contains("synthetic")));
}

#[test]
fn identical_inputs_give_identical_picks() {
    let clock = monitoring_clock();
    let a = synthetic_generator(clock.clone(), ScanConfig::default()).daily_picks(5, 60);
    let b = synthetic_generator(clock, ScanConfig::default()).daily_picks(5, 60);
    assert_eq!(a, b);
}

#[test]
fn outside_trading_window_nothing_is_buy() {
    // 08:00 Istanbul, pre-market.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap(),
    ));
    let picks = synthetic_generator(clock, ScanConfig::default()).daily_picks(5, 0);
    assert_eq!(picks.phase, TradingPhase::PreMarket);
    assert!(picks
        .picks
        .iter()
        .all(|s| s.score.recommendation != Recommendation::Buy));
    assert!(picks.warnings.iter().any(|w| w.contains("time gate")));
}

#[test]
fn majority_failure_yields_data_quality_warning() {
    let clock = monitoring_clock();
    let source = Arc::new(StaticSource::new());
    let gen = HybridSignalGenerator::new(
        source,
        clock,
        ExchangeCalendar::bist(),
        Universe::bist30(),
        ScanConfig::default(),
    );
    let picks = gen.daily_picks(5, 70);
    assert!(picks.picks.is_empty());
    assert_eq!(picks.failures.len(), 30);
    assert!(picks
        .failures
        .iter()
        .all(|f| f.kind == ErrorKind::DataUnavailable));
    assert!(picks.warnings.iter().any(|w| w.starts_with("data_quality")));
    assert!(!picks.market_ok);
}

#[test]
fn per_ticker_signal_reports_typed_errors() {
    let clock = monitoring_clock();
    let source = Arc::new(StaticSource::new());
    source.fail_with(
        "NOPE",
        DataError::InvalidTicker {
            ticker: "NOPE".into(),
        },
    );
    let gen = HybridSignalGenerator::new(
        source,
        clock,
        ExchangeCalendar::bist(),
        Universe::bist30(),
        ScanConfig::default(),
    );
    let err = gen
        .per_ticker_signal("nope", Interval::OneDay, Period::OneYear)
        .unwrap_err();
    assert!(matches!(err, ScanError::Data(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn per_ticker_signal_on_synthetic_data() {
    let gen = synthetic_generator(monitoring_clock(), ScanConfig::default());
    let signal = gen
        .per_ticker_signal("THYAO.IS", Interval::OneDay, Period::OneYear)
        .unwrap();
    assert_eq!(signal.ticker, "THYAO");
    assert_eq!(signal.sector, "Havacılık");
    assert!(signal.score.components_within_caps());
    assert!(signal.levels.check_invariants().is_empty());
}

/// Synthetic bars, but the listed tickers answer only after `delay`.
struct SlowSource {
    inner: SyntheticSource,
    slow: HashSet<String>,
    delay: Duration,
}

impl MarketDataSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    fn fetch_bars(&self, ticker: &str, interval: Interval, period: Period) -> Result<Series, DataError> {
        if self.slow.contains(ticker) {
            std::thread::sleep(self.delay);
        }
        self.inner.fetch_bars(ticker, interval, period)
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        self.inner.fetch_current_price(ticker)
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        self.inner.validate_ticker(ticker)
    }
}

#[test]
fn tickers_past_the_deadline_count_as_timeouts() {
    let clock = monitoring_clock();
    let slow: HashSet<String> = Universe::bist30().all_tickers().into_iter().take(20).collect();
    let source = Arc::new(SlowSource {
        inner: SyntheticSource::new(clock.clone() as Arc<dyn Clock>, ExchangeCalendar::bist()),
        slow: slow.clone(),
        delay: Duration::from_secs(3),
    });
    let config = ScanConfig {
        scan_deadline_secs: 1,
        ..ScanConfig::default()
    };
    let gen = HybridSignalGenerator::new(
        source,
        clock,
        ExchangeCalendar::bist(),
        Universe::bist30(),
        config,
    );

    let picks = gen.daily_picks(5, 0);
    assert_eq!(picks.scanned, 30);
    let timed_out: HashSet<String> = picks
        .failures
        .iter()
        .filter(|f| f.kind == ErrorKind::Timeout)
        .map(|f| f.ticker.clone())
        .collect();
    assert!(timed_out.is_superset(&slow), "{:?}", picks.failures);
    assert!(picks.picks.is_empty());
    assert!(picks.warnings.iter().any(|w| w.contains("scan deadline of 1s")));
    assert!(picks.warnings.iter().any(|w| w.starts_with("data_quality")));
}
