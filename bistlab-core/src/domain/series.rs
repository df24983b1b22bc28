//! An append-only, timestamp-ordered log of bars for one (ticker, interval).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

use super::bar::{Bar, BarError};
use super::interval::Interval;
use crate::error::{Classified, ErrorKind};

/// Where a series came from. Synthetic data is always labelled in outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Yahoo,
    Cache,
    Synthetic,
    Static,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SeriesError {
    #[error("bar {index}: {source}")]
    InvalidBar { index: usize, source: BarError },

    #[error("timestamps must be strictly increasing (bar {index})")]
    NonMonotonic { index: usize },

    #[error("{ticker}: need {required} bars, have {actual}")]
    InsufficientHistory {
        ticker: String,
        required: usize,
        actual: usize,
    },
}

impl Classified for SeriesError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBar { .. } | Self::NonMonotonic { .. } => ErrorKind::InvalidInput,
            Self::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    ticker: String,
    interval: Interval,
    source: DataSource,
    bars: Vec<Bar>,
}

impl Series {
    /// Validates every bar and the strict timestamp ordering.
    pub fn new(
        ticker: impl Into<String>,
        interval: Interval,
        source: DataSource,
        bars: Vec<Bar>,
    ) -> Result<Self, SeriesError> {
        for (index, bar) in bars.iter().enumerate() {
            bar.validate()
                .map_err(|source| SeriesError::InvalidBar { index, source })?;
            if index > 0 && bars[index - 1].timestamp >= bar.timestamp {
                return Err(SeriesError::NonMonotonic { index });
            }
        }
        Ok(Self {
            ticker: ticker.into(),
            interval,
            source,
            bars,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Append one bar at the end of the log.
    pub fn push(&mut self, bar: Bar) -> Result<(), SeriesError> {
        let index = self.bars.len();
        bar.validate()
            .map_err(|source| SeriesError::InvalidBar { index, source })?;
        if let Some(prev) = self.bars.last() {
            if prev.timestamp >= bar.timestamp {
                return Err(SeriesError::NonMonotonic { index });
            }
        }
        self.bars.push(bar);
        Ok(())
    }

    /// The last `n` bars (fewer if the series is shorter).
    pub fn last_n(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// Bars in `range`, clamped to the series bounds.
    pub fn window(&self, range: Range<usize>) -> &[Bar] {
        let end = range.end.min(self.bars.len());
        let start = range.start.min(end);
        &self.bars[start..end]
    }

    /// Bars with `timestamp <= at`.
    pub fn up_to(&self, at: DateTime<Utc>) -> &[Bar] {
        let end = self.bars.partition_point(|b| b.timestamp <= at);
        &self.bars[..end]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume as f64).collect()
    }

    /// Fails with `InsufficientHistory` when shorter than `required`.
    pub fn require(&self, required: usize) -> Result<(), SeriesError> {
        if self.bars.len() < required {
            return Err(SeriesError::InsufficientHistory {
                ticker: self.ticker.clone(),
                required,
                actual: self.bars.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let close = 10.0 + i as f64;
                Bar {
                    timestamp: start + Duration::days(i as i64),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1000,
                }
            })
            .collect()
    }

    #[test]
    fn accepts_ordered_valid_bars() {
        let s = Series::new("AKBNK", Interval::OneDay, DataSource::Static, bars(5)).unwrap();
        assert_eq!(s.len(), 5);
        assert_eq!(s.ticker(), "AKBNK");
        assert_eq!(s.closes(), vec![10.0, 11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let mut b = bars(3);
        b[2].timestamp = b[1].timestamp;
        let err = Series::new("X", Interval::OneDay, DataSource::Static, b).unwrap_err();
        assert_eq!(err, SeriesError::NonMonotonic { index: 2 });
    }

    #[test]
    fn rejects_invalid_bar() {
        let mut b = bars(3);
        b[1].high = 1.0;
        let err = Series::new("X", Interval::OneDay, DataSource::Static, b).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidBar { index: 1, .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn push_is_append_only() {
        let mut s = Series::new("X", Interval::OneDay, DataSource::Static, bars(3)).unwrap();
        let mut stale = s.bars()[0].clone();
        stale.close = stale.open;
        assert!(s.push(stale).is_err());
        let mut next = s.bars()[2].clone();
        next.timestamp += Duration::days(1);
        s.push(next).unwrap();
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn windowed_reads() {
        let s = Series::new("X", Interval::OneDay, DataSource::Static, bars(10)).unwrap();
        assert_eq!(s.last_n(3).len(), 3);
        assert_eq!(s.last_n(30).len(), 10);
        assert_eq!(s.window(2..4)[0].close, 12.0);
        assert_eq!(s.window(8..20).len(), 2);
        let cutoff = s.bars()[4].timestamp;
        assert_eq!(s.up_to(cutoff).len(), 5);
    }

    #[test]
    fn require_reports_insufficient_history() {
        let s = Series::new("X", Interval::OneDay, DataSource::Static, bars(10)).unwrap();
        assert!(s.require(10).is_ok());
        let err = s.require(50).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientHistory);
    }
}
