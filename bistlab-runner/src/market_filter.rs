//! BIST-100 trend filter: the market is "ok" while EMA20 > EMA50 on the
//! index's daily closes. Advisory only; a failed check yields `ok = false`
//! with a warning and the scan carries on.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use bistlab_core::data::MarketDataSource;
use bistlab_core::indicators::{ema, value_at};
use bistlab_core::{Bar, Classified, Clock, Interval, Period};

pub const FAST_PERIOD: usize = 20;
pub const SLOW_PERIOD: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub ok: bool,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl MarketState {
    fn failed(at: DateTime<Utc>, warning: String) -> Self {
        Self {
            ok: false,
            ema20: None,
            ema50: None,
            checked_at: at,
            warning: Some(warning),
        }
    }
}

/// Trend state from index bars alone. Uses every bar given; callers slice the
/// history to what was known at the evaluation date.
pub fn trend_state(bars: &[Bar], at: DateTime<Utc>) -> MarketState {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let Some(last) = closes.len().checked_sub(1) else {
        return MarketState::failed(at, "market filter: index series is empty".to_string());
    };
    let fast = value_at(&ema(&closes, FAST_PERIOD), last);
    let slow = value_at(&ema(&closes, SLOW_PERIOD), last);
    match (fast, slow) {
        (Some(f), Some(s)) => MarketState {
            ok: f > s,
            ema20: Some(f),
            ema50: Some(s),
            checked_at: at,
            warning: (f <= s).then(|| {
                format!("market filter: index EMA20 {f:.2} below EMA50 {s:.2}")
            }),
        },
        _ => MarketState::failed(
            at,
            format!(
                "market filter: index has {} bars, {SLOW_PERIOD} required",
                closes.len()
            ),
        ),
    }
}

/// Cached index trend check.
pub struct MarketFilter {
    source: Arc<dyn MarketDataSource>,
    clock: Arc<dyn Clock>,
    index_ticker: String,
    ttl: Duration,
    cached: Mutex<Option<MarketState>>,
}

impl MarketFilter {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        clock: Arc<dyn Clock>,
        index_ticker: impl Into<String>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            source,
            clock,
            index_ticker: index_ticker.into(),
            ttl: Duration::seconds(ttl_secs as i64),
            cached: Mutex::new(None),
        }
    }

    /// Current state, re-fetching the index once the cached one is older than the TTL.
    pub fn state(&self) -> MarketState {
        let now = self.clock.now();
        if let Some(cached) = self.cached.lock().as_ref() {
            if now - cached.checked_at < self.ttl {
                return cached.clone();
            }
        }

        let state = match self
            .source
            .fetch_bars(&self.index_ticker, Interval::OneDay, Period::SixMonths)
        {
            Ok(series) => trend_state(series.bars(), now),
            Err(e) => MarketState::failed(
                now,
                format!("market filter: {} ({})", e, e.kind().code()),
            ),
        };
        match &state.warning {
            Some(w) => warn!(index = %self.index_ticker, ok = state.ok, "{w}"),
            None => info!(index = %self.index_ticker, ok = state.ok, "market filter refreshed"),
        }
        *self.cached.lock() = Some(state.clone());
        state
    }

    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}
