//! Caching adapter in front of any [`MarketDataSource`].
//!
//! Entries are keyed by `(ticker, interval, period)` and hold an immutable
//! `Arc<Series>` plus its fetch time. Reads never block on other keys; a cache
//! miss takes a per-key fetch lock so at most one upstream call per key is in
//! flight, and concurrent callers for the same key wait and then reuse it.
//!
//! When the upstream fails with a retriable or no-data error and an expired entry
//! exists, the stale entry is served and the failure is logged.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::{normalize_ticker, DataError, MarketDataSource};
use crate::clock::Clock;
use crate::domain::{Interval, Period, Series};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub intraday_ttl_secs: i64,
    pub daily_ttl_secs: i64,
    pub price_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            intraday_ttl_secs: 60,
            daily_ttl_secs: 3600,
            price_ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, interval: Interval) -> Duration {
        if interval.is_intraday() {
            Duration::seconds(self.intraday_ttl_secs)
        } else {
            Duration::seconds(self.daily_ttl_secs)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ticker: String,
    pub interval: Interval,
    pub period: Period,
}

#[derive(Debug, Clone)]
struct CachedSeries {
    series: Arc<Series>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Option<f64>,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_served: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

pub struct CachingSource<P> {
    inner: P,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    bars: DashMap<CacheKey, CachedSeries>,
    prices: DashMap<String, CachedPrice>,
    fetch_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    counters: Counters,
}

impl<P: MarketDataSource> CachingSource<P> {
    pub fn new(inner: P, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner,
            clock,
            config,
            bars: DashMap::new(),
            prices: DashMap::new(),
            fetch_locks: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn fresh(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<Series>> {
        let ttl = self.config.ttl_for(key.interval);
        self.bars
            .get(key)
            .filter(|entry| now - entry.fetched_at < ttl)
            .map(|entry| Arc::clone(&entry.series))
    }

    fn stale(&self, key: &CacheKey) -> Option<Arc<Series>> {
        self.bars.get(key).map(|entry| Arc::clone(&entry.series))
    }

    /// Shared, immutable snapshot of the cached series (fetching on miss).
    pub fn fetch_shared(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Arc<Series>, DataError> {
        let key = CacheKey {
            ticker: normalize_ticker(ticker),
            interval,
            period,
        };

        if let Some(series) = self.fresh(&key, self.clock.now()) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(series);
        }

        // One writer per key; the guard on the map entry is dropped before locking.
        let lock = Arc::clone(self.fetch_locks.entry(key.clone()).or_default().value());
        let _guard = lock.lock();

        // Another caller may have filled the entry while we waited.
        if let Some(series) = self.fresh(&key, self.clock.now()) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(series);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(ticker = %key.ticker, interval = %interval, period = %period, "cache miss");

        match self.inner.fetch_bars(&key.ticker, interval, period) {
            Ok(series) if series.is_empty() => self.serve_stale_or(
                &key,
                DataError::unavailable(&key.ticker, "provider returned an empty series"),
            ),
            Ok(series) => {
                let series = Arc::new(series);
                self.bars.insert(
                    key,
                    CachedSeries {
                        series: Arc::clone(&series),
                        fetched_at: self.clock.now(),
                    },
                );
                Ok(series)
            }
            Err(e) if e.allows_fallback() => self.serve_stale_or(&key, e),
            Err(e) => Err(e),
        }
    }

    fn serve_stale_or(&self, key: &CacheKey, err: DataError) -> Result<Arc<Series>, DataError> {
        match self.stale(key) {
            Some(series) => {
                self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                warn!(ticker = %key.ticker, error = %err, "upstream failed, serving stale cache entry");
                Ok(series)
            }
            None => Err(err),
        }
    }

    /// Drop every entry for `ticker`.
    pub fn invalidate(&self, ticker: &str) {
        let ticker = normalize_ticker(ticker);
        self.bars.retain(|k, _| k.ticker != ticker);
        self.prices.remove(&ticker);
    }

    pub fn clear(&self) {
        self.bars.clear();
        self.prices.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            entries: self.bars.len(),
        }
    }
}

impl<P: MarketDataSource> MarketDataSource for CachingSource<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns a copy of the cached series; the cache keeps its own snapshot.
    fn fetch_bars(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        self.fetch_shared(ticker, interval, period)
            .map(|series| Series::clone(&series))
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        let ticker = normalize_ticker(ticker);
        let now = self.clock.now();
        let ttl = Duration::seconds(self.config.price_ttl_secs);

        if let Some(cached) = self.prices.get(&ticker).map(|e| *e.value()) {
            if now - cached.fetched_at < ttl {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.price);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        match self.inner.fetch_current_price(&ticker) {
            Ok(price) => {
                self.prices.insert(
                    ticker,
                    CachedPrice {
                        price,
                        fetched_at: now,
                    },
                );
                Ok(price)
            }
            Err(e) if e.allows_fallback() => match self.prices.get(&ticker).map(|e| *e.value()) {
                Some(cached) => {
                    self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    warn!(ticker = %ticker, error = %e, "price fetch failed, serving stale price");
                    Ok(cached.price)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        self.inner.validate_ticker(ticker)
    }
}
