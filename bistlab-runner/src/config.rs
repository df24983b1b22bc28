//! Serializable scan and backtest configuration (TOML).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use bistlab_core::universe::INDEX_TICKER;
use bistlab_core::{Classified, ErrorKind, Interval, Period};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Classified for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Daily scan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_picks: usize,
    pub min_score: u8,
    /// Upper bound on the scan worker pool.
    pub workers: usize,
    pub scan_deadline_secs: u64,
    pub fetch_timeout_secs: u64,
    pub interval: Interval,
    pub period: Period,
    /// Fill remaining slots ignoring sectors after the diversified pass.
    pub relax_diversification: bool,
    pub market_filter_ttl_secs: u64,
    pub index_ticker: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_picks: 5,
            min_score: 70,
            workers: 10,
            scan_deadline_secs: 60,
            fetch_timeout_secs: 15,
            interval: Interval::OneDay,
            period: Period::OneYear,
            relax_diversification: false,
            market_filter_ttl_secs: 300,
            index_ticker: INDEX_TICKER.to_string(),
        }
    }
}

impl ScanConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_picks == 0 {
            return Err(invalid("max_picks", "must be at least 1"));
        }
        if self.min_score > 100 {
            return Err(invalid("min_score", "must be within 0..=100"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.scan_deadline_secs == 0 || self.fetch_timeout_secs == 0 {
            return Err(invalid("scan_deadline_secs", "timeouts must be positive"));
        }
        if self.index_ticker.trim().is_empty() {
            return Err(invalid("index_ticker", "must not be empty"));
        }
        Ok(())
    }
}

/// Fill model for new positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Signal on day d, fill at the open of the next bar.
    NextBarOpen,
    /// Fill at the close of the signal bar.
    SameBarClose,
}

/// Backtest settings. Rates are in basis points (1 bp = 0.01%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Universe TOML; the built-in BIST-30 universe when absent.
    pub universe: Option<PathBuf>,
    /// Restrict the universe to these tickers; empty means all.
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub commission_bps: f64,
    pub slippage_bps: f64,
    pub entry_mode: EntryMode,
    /// Percent of current equity committed to each new position.
    pub position_size_pct: f64,
    pub max_open_positions: usize,
    pub max_picks: usize,
    pub min_score: u8,
    /// Seed for ordering candidates before ranking (score ties).
    pub seed: u64,
    /// Bars of history required before a ticker can signal.
    pub warmup_bars: usize,
    /// History fetched by `load_history`.
    pub period: Period,
    pub index_ticker: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            universe: None,
            tickers: Vec::new(),
            start: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
            initial_capital: 100_000.0,
            commission_bps: 10.0,
            slippage_bps: 5.0,
            entry_mode: EntryMode::NextBarOpen,
            position_size_pct: 20.0,
            max_open_positions: 5,
            max_picks: 5,
            min_score: 70,
            seed: 42,
            warmup_bars: 60,
            period: Period::TwoYears,
            index_ticker: INDEX_TICKER.to_string(),
        }
    }
}

impl BacktestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&read(path)?)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(invalid(
                "start",
                format!("start {} is after end {}", self.start, self.end),
            ));
        }
        if !(self.initial_capital > 0.0) {
            return Err(invalid("initial_capital", "must be positive"));
        }
        if !(0.0..=1_000.0).contains(&self.commission_bps) {
            return Err(invalid("commission_bps", "must be within 0..=1000"));
        }
        if !(0.0..=1_000.0).contains(&self.slippage_bps) {
            return Err(invalid("slippage_bps", "must be within 0..=1000"));
        }
        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 100.0) {
            return Err(invalid("position_size_pct", "must be within (0, 100]"));
        }
        if self.max_open_positions == 0 || self.max_picks == 0 {
            return Err(invalid("max_open_positions", "must be at least 1"));
        }
        if self.min_score > 100 {
            return Err(invalid("min_score", "must be within 0..=100"));
        }
        if self.warmup_bars < bistlab_core::scoring::MIN_SCORING_BARS {
            return Err(invalid(
                "warmup_bars",
                format!(
                    "must be at least {}",
                    bistlab_core::scoring::MIN_SCORING_BARS
                ),
            ));
        }
        Ok(())
    }
}
