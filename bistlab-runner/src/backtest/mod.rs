//! Event-driven replay of the hybrid strategy over historical daily bars.
//!
//! Each exchange trading day runs, in order:
//! 1. pending next-bar-open entries fill (or cancel when the open is already
//!    beyond the stop or TP1),
//! 2. the exit pass over open positions ([`Position::on_bar`]),
//! 3. the market gate (index EMA20 > EMA50 as of that day),
//! 4. the entry pass: the same score/levels/diversification pipeline as the
//!    live scan, excluding held tickers and sectors,
//! 5. mark-to-market of the equity curve.
//!
//! Candidates are shuffled with a seeded RNG before the stable rank sort, so
//! equal scores break the same way for the same seed.

pub mod history;
pub mod metrics;
pub mod position;
pub mod report;

pub use history::{load_history, History};
pub use metrics::{BacktestMetrics, SectorStats};
pub use position::{CostModel, ExitLeg, ExitReason, Plan, Position, PositionState};
pub use report::{
    export_equity_csv, export_json, export_trades_csv, run_hash, save_artifacts, BacktestReport,
    EquityPoint, TradeRecord,
};

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use bistlab_core::indicators::{ema, value_at, IndicatorFrame};
use bistlab_core::{
    Classified, ErrorKind, ExchangeCalendar, GateState, LevelPlanner, Series, Signal, Universe,
};

use crate::config::{BacktestConfig, ConfigError, EntryMode};
use crate::generator::{evaluate_bars, select_picks, ScanError};
use crate::market_filter::{FAST_PERIOD, SLOW_PERIOD};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no history loaded for any requested ticker")]
    NoData,

    #[error("no trading days between {start} and {end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("export: {0}")]
    Export(String),

    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl Classified for BacktestError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => e.kind(),
            Self::NoData | Self::EmptyRange { .. } => ErrorKind::InvalidInput,
            Self::Scan(e) => e.kind(),
            Self::Io { .. } => ErrorKind::Transient,
            Self::Csv(_) | Self::Json(_) | Self::Export(_) => ErrorKind::Internal,
        }
    }
}

/// Per-ticker inputs prepared once per run.
struct TickerData<'a> {
    series: &'a Series,
    frame: IndicatorFrame<'a>,
    by_date: HashMap<NaiveDate, usize>,
}

/// Index trend by exchange date.
struct IndexGate {
    dates: Vec<NaiveDate>,
    fast: Vec<f64>,
    slow: Vec<f64>,
}

impl IndexGate {
    fn new(series: &Series, calendar: &ExchangeCalendar) -> Self {
        let closes = series.closes();
        Self {
            dates: series
                .bars()
                .iter()
                .map(|b| calendar.local_date(b.timestamp))
                .collect(),
            fast: ema(&closes, FAST_PERIOD),
            slow: ema(&closes, SLOW_PERIOD),
        }
    }

    /// Uses only index bars dated on or before `date`.
    fn is_open(&self, date: NaiveDate) -> bool {
        let Some(j) = self.dates.partition_point(|d| *d <= date).checked_sub(1) else {
            return false;
        };
        match (value_at(&self.fast, j), value_at(&self.slow, j)) {
            (Some(f), Some(s)) => f > s,
            _ => false,
        }
    }
}

struct Book {
    cash: f64,
    open: Vec<Position>,
    pending: Vec<Signal>,
    last_close: HashMap<String, f64>,
    trades: Vec<TradeRecord>,
}

impl Book {
    fn equity(&self) -> f64 {
        self.cash
            + self
                .open
                .iter()
                .map(|p| {
                    let price = self.last_close.get(&p.ticker).copied().unwrap_or(p.entry_price);
                    p.market_value(price)
                })
                .sum::<f64>()
    }

    fn settle(&mut self, leg: &ExitLeg) {
        self.cash += leg.price * leg.shares as f64 - leg.commission - leg.slippage;
    }

    fn held_tickers(&self) -> HashSet<String> {
        self.open
            .iter()
            .map(|p| p.ticker.clone())
            .chain(self.pending.iter().map(|s| s.ticker.clone()))
            .collect()
    }

    fn held_sectors(&self) -> HashSet<String> {
        self.open
            .iter()
            .map(|p| p.sector.clone())
            .chain(self.pending.iter().map(|s| s.sector.clone()))
            .collect()
    }

    fn occupied(&self) -> usize {
        self.open.len() + self.pending.len()
    }
}

pub struct Backtester {
    config: BacktestConfig,
    planner: LevelPlanner,
    calendar: ExchangeCalendar,
    costs: CostModel,
}

impl Backtester {
    pub fn new(
        config: BacktestConfig,
        universe: &Universe,
        calendar: ExchangeCalendar,
    ) -> Result<Self, BacktestError> {
        config.validate()?;
        let costs = CostModel {
            commission_bps: config.commission_bps,
            slippage_bps: config.slippage_bps,
        };
        Ok(Self {
            planner: LevelPlanner::new(universe),
            config,
            calendar,
            costs,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    fn wanted(&self, ticker: &str) -> bool {
        self.config.tickers.is_empty()
            || self
                .config
                .tickers
                .iter()
                .any(|t| t.eq_ignore_ascii_case(ticker))
    }

    pub fn run(&self, history: &History) -> Result<BacktestReport, BacktestError> {
        let cfg = &self.config;
        let days = self.calendar.trading_days(cfg.start, cfg.end);
        let (Some(&first_day), Some(&last_day)) = (days.first(), days.last()) else {
            return Err(BacktestError::EmptyRange {
                start: cfg.start,
                end: cfg.end,
            });
        };

        let data: Vec<(String, TickerData)> = history
            .series
            .iter()
            .filter(|(ticker, _)| self.wanted(ticker))
            .map(|(ticker, series)| {
                let by_date = series
                    .bars()
                    .iter()
                    .enumerate()
                    .map(|(i, b)| (self.calendar.local_date(b.timestamp), i))
                    .collect();
                let td = TickerData {
                    series,
                    frame: IndicatorFrame::compute(series.bars()),
                    by_date,
                };
                (ticker.clone(), td)
            })
            .collect();
        if data.is_empty() {
            return Err(BacktestError::NoData);
        }
        let data: HashMap<String, TickerData> = data.into_iter().collect();
        let mut tickers: Vec<&String> = data.keys().collect();
        tickers.sort();

        let mut warnings = history.warnings.clone();
        let gate = history
            .index
            .as_ref()
            .map(|s| IndexGate::new(s, &self.calendar));
        if gate.is_none() {
            warnings.push("no index history: market gate open on every day".to_string());
        }

        info!(
            tickers = tickers.len(),
            days = days.len(),
            start = %first_day,
            end = %last_day,
            "backtest started"
        );

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut book = Book {
            cash: cfg.initial_capital,
            open: Vec::new(),
            pending: Vec::new(),
            last_close: HashMap::new(),
            trades: Vec::new(),
        };
        let mut equity_curve = Vec::with_capacity(days.len());
        let mut missing_bars = 0usize;
        let mut cancelled = 0usize;
        let mut closed_gate_days = 0usize;

        for &day in &days {
            // 1. Pending next-bar-open fills.
            for signal in std::mem::take(&mut book.pending) {
                let Some(bar) = data
                    .get(&signal.ticker)
                    .and_then(|td| td.by_date.get(&day).map(|&i| &td.series.bars()[i]))
                else {
                    cancelled += 1;
                    continue;
                };
                let levels = &signal.levels;
                if bar.open <= levels.stop_loss || bar.open >= levels.tp1 {
                    debug!(ticker = %signal.ticker, open = bar.open, "entry cancelled at open");
                    cancelled += 1;
                    continue;
                }
                let equity = book.equity();
                if let Some(p) = self.open_position(&mut book, equity, &signal, day, bar.open) {
                    book.open.push(p);
                }
            }

            // 2. Exit pass.
            let mut open = std::mem::take(&mut book.open);
            for p in &mut open {
                let Some(td) = data.get(&p.ticker) else { continue };
                let Some(&i) = td.by_date.get(&day) else {
                    missing_bars += 1;
                    continue;
                };
                let bar = &td.series.bars()[i];
                book.last_close.insert(p.ticker.clone(), bar.close);
                if let Some(leg) = p.on_bar(day, bar, &self.costs) {
                    debug!(ticker = %p.ticker, reason = leg.reason.as_str(), price = leg.price, "exit");
                    book.settle(&leg);
                }
            }
            let (closed, still_open): (Vec<_>, Vec<_>) =
                open.into_iter().partition(|p| p.is_closed());
            book.open = still_open;
            book.trades
                .extend(closed.iter().filter_map(TradeRecord::from_position));

            // 3. Market gate.
            let market_ok = gate.as_ref().map_or(true, |g| g.is_open(day));
            if !market_ok {
                closed_gate_days += 1;
            }

            // 4. Entry pass.
            let slots = cfg
                .max_picks
                .min(cfg.max_open_positions.saturating_sub(book.occupied()));
            if market_ok && slots > 0 {
                let held = book.held_tickers();
                let mut candidates = Vec::new();
                for ticker in &tickers {
                    if held.contains(*ticker) {
                        continue;
                    }
                    let td = &data[*ticker];
                    let Some(&i) = td.by_date.get(&day) else { continue };
                    if i + 1 < cfg.warmup_bars {
                        continue;
                    }
                    let Some(snapshot) = td.frame.snapshot_at(i) else { continue };
                    let bars = &td.series.bars()[..=i];
                    let signal = evaluate_bars(
                        ticker,
                        bars,
                        &snapshot,
                        GateState::open(),
                        &self.planner,
                        td.series.source(),
                        bars[i].timestamp,
                    )?;
                    if signal.score.is_buy() && signal.score.total >= cfg.min_score {
                        candidates.push(signal);
                    }
                }
                candidates.shuffle(&mut rng);
                let picks = select_picks(candidates, slots, false, &held, &book.held_sectors());

                for signal in picks {
                    match cfg.entry_mode {
                        EntryMode::NextBarOpen => book.pending.push(signal),
                        EntryMode::SameBarClose => {
                            let price = signal.levels.entry;
                            let equity = book.equity();
                            if let Some(p) = self.open_position(&mut book, equity, &signal, day, price)
                            {
                                book.last_close.insert(p.ticker.clone(), price);
                                book.open.push(p);
                            }
                        }
                    }
                }
            }

            // 5. Mark to market.
            equity_curve.push(EquityPoint {
                date: day,
                equity: book.equity(),
            });
        }

        // Close out at the last known close.
        for mut p in std::mem::take(&mut book.open) {
            let price = book.last_close.get(&p.ticker).copied().unwrap_or(p.entry_price);
            let leg = p.close_remaining(last_day, price, ExitReason::EndOfData, &self.costs);
            book.settle(&leg);
            book.trades.extend(TradeRecord::from_position(&p));
        }
        if let Some(last) = equity_curve.last_mut() {
            last.equity = book.cash;
        }

        if missing_bars > 0 {
            warnings.push(format!(
                "{missing_bars} position-days without a bar; exits deferred"
            ));
        }
        if cancelled > 0 {
            warnings.push(format!("{cancelled} entries cancelled at the next open"));
        }
        if closed_gate_days > 0 {
            debug!(days = closed_gate_days, "market gate closed");
        }

        let trades = book.trades;
        let metrics = BacktestMetrics::compute(&trades, &equity_curve, cfg.initial_capital);
        let run_hash = run_hash(&trades, &metrics);
        info!(
            trades = metrics.total_trades,
            total_return = metrics.total_return,
            max_drawdown = metrics.max_drawdown,
            run_hash = %run_hash,
            "backtest complete"
        );
        if history.has_synthetic() {
            warn!("backtest ran on synthetic data");
            warnings.push("synthetic data used: results are illustrative only".to_string());
        }

        Ok(BacktestReport {
            config: cfg.clone(),
            sector_stats: metrics::sector_stats(&trades),
            metrics,
            trades,
            equity_curve,
            warnings,
            has_synthetic: history.has_synthetic(),
            run_hash,
        })
    }

    /// Size and open a position at `price`. `None` when the budget buys no shares.
    fn open_position(
        &self,
        book: &mut Book,
        equity: f64,
        signal: &Signal,
        day: NaiveDate,
        price: f64,
    ) -> Option<Position> {
        let budget = (equity * self.config.position_size_pct / 100.0).min(book.cash);
        let per_share = self.costs.cost_per_share(price);
        if !(budget > 0.0 && per_share > 0.0) {
            return None;
        }
        let shares = (budget / per_share).floor() as u64;
        if shares == 0 {
            debug!(ticker = %signal.ticker, budget, price, "position too small");
            return None;
        }
        let plan = Plan {
            stop: signal.levels.stop_loss,
            tp1: signal.levels.tp1,
            tp2: signal.levels.tp2,
            max_hold_days: signal.levels.max_hold_days,
        };
        let p = Position::open(
            &signal.ticker,
            &signal.sector,
            signal.score.total,
            day,
            price,
            shares,
            plan,
            &self.costs,
        );
        book.cash -= p.entry_cash();
        debug!(ticker = %p.ticker, shares, price, "entry");
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistlab_core::{Bar, DataSource, Interval};
    use chrono::{Duration, TimeZone, Utc};

    fn series(ticker: &str, closes: &[f64]) -> Series {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: t0 + Duration::days(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1_000_000,
            })
            .collect();
        Series::new(ticker, Interval::OneDay, DataSource::Static, bars).unwrap()
    }

    #[test]
    fn empty_range_is_invalid_input() {
        let cfg = BacktestConfig {
            start: NaiveDate::from_ymd_opt(2024, 6, 8).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 6, 9).unwrap(),
            ..BacktestConfig::default()
        };
        let bt = Backtester::new(cfg, &Universe::bist30(), ExchangeCalendar::bist()).unwrap();
        let history = History::new([series("AKBNK", &[10.0; 200])], None);
        let err = bt.run(&history).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn no_matching_history_is_invalid_input() {
        let cfg = BacktestConfig {
            tickers: vec!["THYAO".into()],
            ..BacktestConfig::default()
        };
        let bt = Backtester::new(cfg, &Universe::bist30(), ExchangeCalendar::bist()).unwrap();
        let history = History::new([series("AKBNK", &[10.0; 200])], None);
        assert!(matches!(bt.run(&history), Err(BacktestError::NoData)));
    }

    #[test]
    fn flat_market_trades_nothing_and_keeps_capital() {
        let cfg = BacktestConfig {
            start: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            ..BacktestConfig::default()
        };
        let bt = Backtester::new(cfg, &Universe::bist30(), ExchangeCalendar::bist()).unwrap();
        let history = History::new([series("AKBNK", &[10.0; 250])], None);
        let report = bt.run(&history).unwrap();
        assert!(report.trades.is_empty());
        assert!(report
            .equity_curve
            .iter()
            .all(|p| (p.equity - 100_000.0).abs() < 1e-9));
        assert!(report.warnings.iter().any(|w| w.contains("market gate open")));
    }

    #[test]
    fn index_gate_uses_only_past_bars() {
        let mut closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..80).map(|i| 180.0 - 2.0 * i as f64));
        let s = series("XU100", &closes);
        let gate = IndexGate::new(&s, &ExchangeCalendar::bist());
        let rising_day = ExchangeCalendar::bist().local_date(s.bars()[79].timestamp);
        assert!(gate.is_open(rising_day));
        let before_any = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert!(!gate.is_open(before_any));
        let falling_day = ExchangeCalendar::bist().local_date(s.bars()[159].timestamp);
        assert!(!gate.is_open(falling_day));
    }
}
