//! Market data contract and its error type.

use std::sync::Arc;
use thiserror::Error;

use crate::domain::{Interval, Period, Series, SeriesError};
use crate::error::{Classified, ErrorKind};

/// Errors a market data source can raise.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("no data for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("unknown ticker: {ticker}")]
    InvalidTicker { ticker: String },

    #[error("fetch for {ticker} timed out after {after_secs}s")]
    Timeout { ticker: String, after_secs: u64 },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("circuit breaker tripped, refusing requests")]
    CircuitBreakerTripped,

    #[error("provider response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

impl Classified for DataError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DataUnavailable { .. } | Self::ResponseFormatChanged(_) => {
                ErrorKind::DataUnavailable
            }
            Self::InvalidTicker { .. } => ErrorKind::InvalidInput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NetworkUnreachable(_) | Self::RateLimited { .. } | Self::CircuitBreakerTripped => {
                ErrorKind::Transient
            }
            Self::Series(e) => e.kind(),
        }
    }
}

impl DataError {
    pub fn unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a cached or synthetic substitute may stand in for the failed fetch.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DataUnavailable | ErrorKind::Timeout | ErrorKind::Transient
        )
    }
}

/// Abstract provider of OHLCV bars and current prices.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Most recent bars covering at least `period`. May return fewer bars than
    /// the period implies when the upstream has gaps; callers validate length.
    fn fetch_bars(&self, ticker: &str, interval: Interval, period: Period)
        -> Result<Series, DataError>;

    /// Latest trade price, if the provider knows one.
    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError>;

    /// Best-effort symbol check.
    fn validate_ticker(&self, ticker: &str) -> bool;
}

impl<T: MarketDataSource + ?Sized> MarketDataSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Series, DataError> {
        (**self).fetch_bars(ticker, interval, period)
    }

    fn fetch_current_price(&self, ticker: &str) -> Result<Option<f64>, DataError> {
        (**self).fetch_current_price(ticker)
    }

    fn validate_ticker(&self, ticker: &str) -> bool {
        (**self).validate_ticker(ticker)
    }
}

/// Normalise a user-supplied ticker: trimmed, upper-case, `.IS` suffix removed.
pub fn normalize_ticker(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    upper
        .strip_suffix(".IS")
        .map(str::to_string)
        .unwrap_or(upper)
}
