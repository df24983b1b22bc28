//! BistLab Runner — everything built on top of the pure core that owns threads,
//! files or mutable shared state:
//! - Hybrid signal generator (parallel scan, ranking, sector diversification)
//! - Market filter and the once-per-day picks service
//! - Daily picks persistence
//! - Backtester, metrics and trade export
//! - Alert manager and alert store
//! - TOML configuration

pub mod alerts;
pub mod backtest;
pub mod config;
pub mod generator;
pub mod market_filter;
pub mod picks_service;
pub mod picks_store;

pub use alerts::{
    Alert, AlertError, AlertFeed, AlertFilter, AlertKind, AlertManager, AlertStore, MarketTick, Priority,
};
pub use backtest::{load_history, BacktestError, BacktestReport, Backtester, History};
pub use config::{BacktestConfig, ConfigError, EntryMode, ScanConfig};
pub use generator::{
    evaluate_bars, evaluate_series, select_picks, DailyPicks, HybridSignalGenerator, ScanError,
    TickerFailure, STRATEGY_VERSION,
};
pub use market_filter::{MarketFilter, MarketState};
pub use picks_service::PicksService;
pub use picks_store::{PicksFile, PicksStore, StoreError};
