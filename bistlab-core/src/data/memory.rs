//! In-memory market data source.
//!
//! Serves pre-loaded series (backtests replaying files, tests, demos). Interval
//! and period are ignored; the stored series is returned whole. Failures can be
//! injected per ticker.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::provider::{normalize_ticker, DataError, MarketDataSource};
use crate::domain::{DataSource, Interval, Period, Series};

#[derive(Debug, Default)]
pub struct StaticSource {
    series: RwLock<HashMap<String, Series>>,
    prices: RwLock<HashMap<String, f64>>,
    failures: RwLock<HashMap<String, DataError>>,
    fetches: AtomicU64,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_series(all: impl IntoIterator<Item = Series>) -> Self {
        let source = Self::new();
        for s in all {
            source.insert_series(s);
        }
        source
    }

    pub fn insert_series(&self, series: Series) {
        let series = series.with_source(DataSource::Static);
        self.series
            .write()
            .insert(normalize_ticker(series.ticker()), series);
    }

    pub fn set_price(&self, ticker: &str, price: f64) {
        self.prices.write().insert(normalize_ticker(ticker), price);
    }

    /// Every subsequent call for `ticker` fails with `err` until cleared.
    pub fn fail_with(&self, ticker: &str, err: DataError) {
        self.failures.write().insert(normalize_ticker(ticker), err);
    }

    pub fn clear_failure(&self, ticker: &str) {
        self.failures.write().remove(&normalize_ticker(ticker));
    }

    /// Number of `fetch_bars` calls served or failed so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut all: Vec<String> = self.series.read().keys().cloned().collect();
        all.sort();
        all
    }

    fn failure(&self, ticker: &str) -> Option<DataError> {
        self.failures.read().get(ticker).cloned()
    }
}

impl MarketDataSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        _interval: Interval,
        _period: Period,
    ) -> Result<Series, DataError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let ticker = normalize_ticker(ticker);
        if let Some(err) = self.failure(&ticker) {
            return Err(err);
        }
        self.series
            .read()
            .get(&ticker)
            .cloned()
            .ok_or_else(|| DataError::unavailable(&ticker, "no series loaded"))
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        let ticker = normalize_ticker(ticker);
        if let Some(err) = self.failure(&ticker) {
            return Err(err);
        }
        if let Some(price) = self.prices.read().get(&ticker) {
            return Ok(Some(*price));
        }
        Ok(self
            .series
            .read()
            .get(&ticker)
            .and_then(|s| s.last().map(|b| b.close)))
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        self.series.read().contains_key(&normalize_ticker(ticker))
    }
}
