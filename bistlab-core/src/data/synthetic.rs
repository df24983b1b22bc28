//! Synthetic market data for environments without external access.
//!
//! Bars are a seeded random walk: the seed is BLAKE3 of the ticker and interval,
//! so the same ticker, interval and clock date always produce the same series.
//! Every series is labelled [`DataSource::Synthetic`] and must never be mistaken
//! for market data.

use chrono::{Duration, NaiveTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::warn;

use super::provider::{normalize_ticker, DataError, MarketDataSource};
use crate::calendar::ExchangeCalendar;
use crate::clock::Clock;
use crate::domain::{Bar, DataSource, Interval, Period, Series};

/// Upper bound on generated intraday bars per series.
const MAX_INTRADAY_BARS: usize = 5_000;

pub struct SyntheticSource {
    clock: Arc<dyn Clock>,
    calendar: ExchangeCalendar,
}

impl SyntheticSource {
    pub fn new(clock: Arc<dyn Clock>, calendar: ExchangeCalendar) -> Self {
        Self { clock, calendar }
    }

    fn rng_for(ticker: &str, interval: Interval) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ticker.as_bytes());
        hasher.update(b"|");
        hasher.update(interval.as_str().as_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }

    fn session_stamps(&self, interval: Interval, period: Period) -> Vec<chrono::DateTime<Utc>> {
        let today = self.calendar.local_date(self.clock.now());
        let start = today - Duration::days(period.calendar_days());
        let days = self.calendar.trading_days(start, today);

        let open = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN);
        if !interval.is_intraday() {
            return days
                .into_iter()
                .filter_map(|d| self.calendar.at_local(d, open))
                .collect();
        }

        let step = Duration::seconds(interval.duration().as_secs() as i64);
        let mut stamps = Vec::new();
        for d in days {
            let (Some(first), Some(close)) = (
                self.calendar.at_local(d, open),
                self.calendar
                    .at_local(d, NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN)),
            ) else {
                continue;
            };
            let mut t = first;
            while t < close {
                stamps.push(t);
                t += step;
            }
        }
        let excess = stamps.len().saturating_sub(MAX_INTRADAY_BARS);
        stamps.split_off(excess)
    }

    pub fn generate(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        let ticker = normalize_ticker(ticker);
        let mut rng = Self::rng_for(&ticker, interval);
        let stamps = self.session_stamps(interval, period);

        // Scale daily volatility down to the bar width.
        let scale = if interval.is_intraday() {
            (interval.duration().as_secs_f64() / (8.0 * 3600.0)).sqrt()
        } else {
            1.0
        };
        let drift = rng.gen_range(-0.0005..0.0015) * scale;
        let vol = rng.gen_range(0.012..0.028) * scale;
        let base_volume = rng.gen_range(2_000_000..40_000_000u64) as f64 * scale.max(0.01);
        let mut price = rng.gen_range(10.0..200.0_f64);

        let mut bars = Vec::with_capacity(stamps.len());
        for timestamp in stamps {
            let ret: f64 = drift + rng.gen_range(-1.0..1.0) * vol;
            let open = price;
            let close = (price * (1.0 + ret)).max(0.01);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.6) * vol);
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.6) * vol);
            let volume = (base_volume * rng.gen_range(0.4..2.2)) as u64;
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            });
            price = close;
        }

        Ok(Series::new(ticker, interval, DataSource::Synthetic, bars)?)
    }
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        let series = self.generate(ticker, interval, period)?;
        if series.is_empty() {
            return Err(DataError::unavailable(ticker, "no trading days in period"));
        }
        Ok(series)
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        Ok(self
            .generate(ticker, Interval::OneDay, Period::OneMonth)?
            .last()
            .map(|b| b.close))
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        !normalize_ticker(ticker).is_empty()
    }
}

/// Wraps a real provider and substitutes synthetic data when it fails with a
/// no-data, timeout or transient error. Invalid tickers are never masked.
pub struct FallbackSource<P> {
    inner: P,
    synthetic: SyntheticSource,
}

impl<P: MarketDataSource> FallbackSource<P> {
    pub fn new(inner: P, synthetic: SyntheticSource) -> Self {
        Self { inner, synthetic }
    }
}

impl<P: MarketDataSource> MarketDataSource for FallbackSource<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        match self.inner.fetch_bars(ticker, interval, period) {
            Ok(series) => Ok(series),
            Err(e) if e.allows_fallback() => {
                warn!(ticker, error = %e, "substituting synthetic bars");
                self.synthetic.fetch_bars(ticker, interval, period)
            }
            Err(e) => Err(e),
        }
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        match self.inner.fetch_current_price(ticker) {
            Ok(price) => Ok(price),
            Err(e) if e.allows_fallback() => {
                warn!(ticker, error = %e, "substituting synthetic price");
                self.synthetic.fetch_current_price(ticker)
            }
            Err(e) => Err(e),
        }
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        self.inner.validate_ticker(ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::memory::StaticSource;
    use chrono::TimeZone;

    fn source() -> SyntheticSource {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap(),
        ));
        SyntheticSource::new(clock, ExchangeCalendar::bist())
    }

    #[test]
    fn deterministic_per_ticker() {
        let s = source();
        let a = s.fetch_bars("THYAO", Interval::OneDay, Period::OneYear).unwrap();
        let b = s.fetch_bars("THYAO", Interval::OneDay, Period::OneYear).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source(), DataSource::Synthetic);
    }

    #[test]
    fn different_tickers_differ() {
        let s = source();
        let a = s.fetch_bars("THYAO", Interval::OneDay, Period::OneYear).unwrap();
        let b = s.fetch_bars("GARAN", Interval::OneDay, Period::OneYear).unwrap();
        assert_ne!(a.closes(), b.closes());
    }

    #[test]
    fn one_year_daily_has_about_250_bars() {
        let s = source();
        let series = s.fetch_bars("AKBNK", Interval::OneDay, Period::OneYear).unwrap();
        assert!((240..=260).contains(&series.len()), "got {}", series.len());
        assert!(series.bars().iter().all(Bar::is_sane));
    }

    #[test]
    fn intraday_bars_stay_inside_session() {
        let s = source();
        let series = s
            .fetch_bars("AKBNK", Interval::FifteenMinutes, Period::FiveDays)
            .unwrap();
        let cal = ExchangeCalendar::bist();
        for bar in series.bars() {
            let local = cal.local(bar.timestamp);
            assert!((10..18).contains(&chrono::Timelike::hour(&local)));
        }
        // 32 bars per session
        assert_eq!(series.len() % 32, 0);
    }

    #[test]
    fn fallback_substitutes_on_transient_error() {
        let inner = StaticSource::new();
        inner.fail_with("THYAO", DataError::NetworkUnreachable("offline".into()));
        let fb = FallbackSource::new(inner, source());
        let series = fb.fetch_bars("THYAO", Interval::OneDay, Period::OneYear).unwrap();
        assert_eq!(series.source(), DataSource::Synthetic);
    }

    #[test]
    fn fallback_does_not_mask_invalid_ticker() {
        let inner = StaticSource::new();
        inner.fail_with("BAD", DataError::InvalidTicker { ticker: "BAD".into() });
        let fb = FallbackSource::new(inner, source());
        assert!(fb.fetch_bars("BAD", Interval::OneDay, Period::OneYear).is_err());
    }
}
