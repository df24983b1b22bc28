//! Yahoo Finance data provider.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API. BIST symbols are listed with the
//! `.IS` suffix (`THYAO` -> `THYAO.IS`, index `XU100` -> `XU100.IS`). Handles
//! rate limiting, retries with exponential backoff, response parsing, and the
//! circuit breaker. Every request carries a hard timeout.
//!
//! Yahoo has no official API and changes its format without notice; parse
//! failures surface as `ResponseFormatChanged` (kind `DataUnavailable`).

use chrono::DateTime;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::provider::{normalize_ticker, DataError, MarketDataSource};
use crate::domain::{Bar, DataSource, Interval, Period, Series};
use crate::universe::{Universe, INDEX_TICKER};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

struct Parsed {
    bars: Vec<Bar>,
    regular_market_price: Option<f64>,
}

pub struct YahooSource {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    known: HashSet<String>,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooSource {
    /// Client with the given hard per-request timeout. BIST-30 symbols and the
    /// index validate locally.
    pub fn new(circuit_breaker: Arc<CircuitBreaker>, timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::NetworkUnreachable(format!("failed to build HTTP client: {e}")))?;

        let mut known: HashSet<String> = Universe::bist30().all_tickers().into_iter().collect();
        known.insert(INDEX_TICKER.to_string());

        Ok(Self {
            client,
            circuit_breaker,
            known,
            timeout,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_known_tickers(mut self, tickers: impl IntoIterator<Item = String>) -> Self {
        self.known.extend(tickers.into_iter().map(|t| normalize_ticker(&t)));
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// `THYAO` -> `THYAO.IS`. Symbols that already carry an exchange suffix or
    /// a caret prefix are passed through.
    pub fn provider_symbol(ticker: &str) -> String {
        let t = ticker.trim().to_ascii_uppercase();
        if t.contains('.') || t.starts_with('^') {
            t
        } else {
            format!("{t}.IS")
        }
    }

    fn chart_url(symbol: &str, interval: Interval, period: Period) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?range={}&interval={}&includePrePost=false",
            period.as_str(),
            yahoo_interval(interval),
        )
    }

    fn parse_response(ticker: &str, resp: ChartResponse) -> Result<Parsed, DataError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => DataError::InvalidTicker {
                ticker: ticker.to_string(),
            },
            Some(err) => {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => DataError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        let regular_market_price = data.meta.and_then(|m| m.regular_market_price);
        let timestamps = data.timestamp.unwrap_or_default();
        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        // Yahoo repeats the live bar with the same timestamp; keep the last copy.
        let mut by_ts: BTreeMap<i64, Bar> = BTreeMap::new();
        let mut skipped = 0usize;
        for (i, &ts) in timestamps.iter().enumerate() {
            let fields = (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            );
            let (Some(open), Some(high), Some(low), Some(close)) = fields else {
                skipped += 1;
                continue;
            };
            let Some(timestamp) = DateTime::from_timestamp(ts, 0) else {
                return Err(DataError::ResponseFormatChanged(format!(
                    "invalid timestamp: {ts}"
                )));
            };
            let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);
            match Bar::new(timestamp, open, high, low, close, volume) {
                Ok(bar) => {
                    by_ts.insert(ts, bar);
                }
                Err(e) => {
                    debug!(ticker, ts, error = %e, "dropping malformed bar");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            debug!(ticker, skipped, "skipped incomplete bars");
        }

        Ok(Parsed {
            bars: by_ts.into_values().collect(),
            regular_market_price,
        })
    }

    fn fetch_with_retry(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Parsed, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let symbol = Self::provider_symbol(ticker);
        let url = Self::chart_url(&symbol, interval, period);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    // A timed-out fetch counts as missing data; no retry past the deadline.
                    self.circuit_breaker.record_failure();
                    return Err(DataError::Timeout {
                        ticker: ticker.to_string(),
                        after_secs: self.timeout.as_secs(),
                    });
                }
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                warn!(ticker, "provider returned 403, tripping circuit breaker");
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(DataError::InvalidTicker {
                    ticker: ticker.to_string(),
                });
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::NetworkUnreachable(format!(
                    "HTTP {status} for {symbol}"
                )));
                continue;
            }

            let chart: ChartResponse = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
            })?;
            let parsed = Self::parse_response(ticker, chart)?;
            self.circuit_breaker.record_success();
            return Ok(parsed);
        }

        Err(last_error.unwrap_or_else(|| DataError::NetworkUnreachable("max retries exceeded".into())))
    }
}

fn yahoo_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::OneHour => "60m",
        other => other.as_str(),
    }
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        let ticker = normalize_ticker(ticker);
        let parsed = self.fetch_with_retry(&ticker, interval, period)?;
        if parsed.bars.is_empty() {
            return Err(DataError::unavailable(&ticker, "provider returned no bars"));
        }
        Ok(Series::new(ticker, interval, DataSource::Yahoo, parsed.bars)?)
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        let ticker = normalize_ticker(ticker);
        let parsed = self.fetch_with_retry(&ticker, Interval::OneDay, Period::FiveDays)?;
        Ok(parsed
            .regular_market_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .or_else(|| parsed.bars.last().map(|b| b.close)))
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return false;
        }
        if self.known.contains(&ticker) {
            return true;
        }
        match self.fetch_with_retry(&ticker, Interval::OneDay, Period::FiveDays) {
            Ok(parsed) => !parsed.bars.is_empty(),
            Err(e) => {
                debug!(ticker = %ticker, error = %e, "ticker validation failed");
                false
            }
        }
    }
}
