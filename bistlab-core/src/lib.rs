//! BistLab Core — domain types, market data and the pure scoring pipeline.
//!
//! This crate contains everything the signal generator and the backtester share:
//! - Domain types (bars, series, intervals, signals)
//! - Clock abstraction and the Istanbul exchange calendar
//! - Market data contract, caching adapter, Yahoo provider, synthetic fallback
//! - Indicator engine (pure functions over bar slices, NaN warmup)
//! - Scorer and level planner
//! - Universe and compile-time sector profiles
//!
//! Nothing in here spawns threads or owns an async runtime.

pub mod calendar;
pub mod clock;
pub mod data;
pub mod domain;
pub mod error;
pub mod indicators;
pub mod levels;
pub mod scoring;
pub mod universe;

pub use calendar::{ExchangeCalendar, TradingPhase, EXCHANGE_TZ};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{Bar, BarError, DataSource, Interval, Period, Series, SeriesError, Signal};
pub use error::{Classified, ErrorKind, ErrorResponse};
pub use indicators::IndicatorSnapshot;
pub use levels::{LevelPlanner, LevelSource, Levels, SectorProfile};
pub use scoring::{GateState, Quality, Recommendation, Score, Scorer};
pub use universe::Universe;
