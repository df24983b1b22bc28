//! Hybrid signal generator: parallel universe scan, ranking, sector
//! diversification.
//!
//! The per-ticker pipeline ([`evaluate_bars`]) and the rank + diversify step
//! ([`select_picks`]) are pure and shared with the backtester. The generator
//! adds the I/O around them: fetching bars on a bounded rayon pool under an
//! overall deadline, the time-of-day gate and the market filter.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use bistlab_core::data::{DataError, MarketDataSource};
use bistlab_core::scoring::MIN_SCORING_BARS;
use bistlab_core::{
    Bar, Classified, Clock, DataSource, ErrorKind, ExchangeCalendar, GateState,
    IndicatorSnapshot, Interval, LevelPlanner, Period, Scorer, Series, Signal, TradingPhase,
    Universe,
};

use crate::config::ScanConfig;
use crate::market_filter::MarketFilter;

/// Identifies the strategy that produced a picks list.
pub const STRATEGY_VERSION: &str = "hybrid-trend-pullback/2";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("{ticker}: {bars} bars, {required} required")]
    InsufficientHistory {
        ticker: String,
        bars: usize,
        required: usize,
    },

    #[error("{ticker}: level invariants violated: {violated}")]
    LevelInvariant { ticker: String, violated: String },

    #[error("{ticker}: not scanned within the {after_secs}s deadline")]
    Deadline { ticker: String, after_secs: u64 },

    #[error("worker pool: {0}")]
    Pool(String),
}

impl Classified for ScanError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Data(e) => e.kind(),
            Self::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
            Self::Deadline { .. } => ErrorKind::Timeout,
            Self::LevelInvariant { .. } | Self::Pool(_) => ErrorKind::Internal,
        }
    }
}

/// One ticker that dropped out of a scan, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerFailure {
    pub ticker: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl TickerFailure {
    pub fn new(ticker: &str, err: &impl Classified) -> Self {
        Self {
            ticker: ticker.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPicks {
    /// Exchange-local date of the scan.
    pub scan_date: NaiveDate,
    pub scan_time: DateTime<Utc>,
    pub market_ok: bool,
    pub phase: TradingPhase,
    pub picks: Vec<Signal>,
    pub warnings: Vec<String>,
    pub strategy_version: String,
    /// Tickers attempted.
    pub scanned: usize,
    #[serde(default)]
    pub failures: Vec<TickerFailure>,
}

impl DailyPicks {
    pub fn tickers(&self) -> Vec<&str> {
        self.picks.iter().map(|s| s.ticker.as_str()).collect()
    }
}

/// Score and plan one ticker from its bars (oldest first, last bar = signal bar).
///
/// A guard `AVOID` (degenerate window, missing indicators) is still a signal;
/// only a levels invariant violation fails.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_bars(
    ticker: &str,
    bars: &[Bar],
    snapshot: &IndicatorSnapshot,
    gate: GateState,
    planner: &LevelPlanner,
    data_source: DataSource,
    generated_at: DateTime<Utc>,
) -> Result<Signal, ScanError> {
    let last = bars.last().ok_or_else(|| ScanError::InsufficientHistory {
        ticker: ticker.to_string(),
        bars: 0,
        required: MIN_SCORING_BARS,
    })?;
    let score = Scorer::score(bars, snapshot, gate);
    let levels = planner.plan(ticker, last, snapshot);

    let violated = levels.check_invariants();
    if !violated.is_empty() {
        return Err(ScanError::LevelInvariant {
            ticker: ticker.to_string(),
            violated: violated.join(", "),
        });
    }

    let mut reasons = score.reasons.clone();
    if score.failure_kind().is_none() {
        reasons.push(format!(
            "stop {:.2} ({:?}), R/R {:.1}",
            levels.stop_loss, levels.stop_source, levels.rr1
        ));
    }
    Ok(Signal {
        ticker: ticker.to_string(),
        sector: levels.sector.clone(),
        score,
        levels,
        reasons,
        generated_at,
        data_source,
    })
}

/// [`evaluate_bars`] over a whole series, after the length check.
pub fn evaluate_series(
    series: &Series,
    gate: GateState,
    planner: &LevelPlanner,
    generated_at: DateTime<Utc>,
) -> Result<Signal, ScanError> {
    if series.len() < MIN_SCORING_BARS {
        return Err(ScanError::InsufficientHistory {
            ticker: series.ticker().to_string(),
            bars: series.len(),
            required: MIN_SCORING_BARS,
        });
    }
    let snapshot =
        IndicatorSnapshot::from_bars(series.bars()).ok_or_else(|| ScanError::InsufficientHistory {
            ticker: series.ticker().to_string(),
            bars: 0,
            required: MIN_SCORING_BARS,
        })?;
    evaluate_bars(
        series.ticker(),
        series.bars(),
        &snapshot,
        gate,
        planner,
        series.source(),
        generated_at,
    )
}

/// Rank by score (descending, stable) and admit at most one ticker per sector
/// until `max_picks`. With `relax`, a second pass fills remaining slots in rank
/// order ignoring sectors. Excluded tickers never pass; excluded sectors count
/// as already taken.
pub fn select_picks(
    mut candidates: Vec<Signal>,
    max_picks: usize,
    relax: bool,
    excluded_tickers: &HashSet<String>,
    excluded_sectors: &HashSet<String>,
) -> Vec<Signal> {
    candidates.retain(|c| !excluded_tickers.contains(&c.ticker));
    candidates.sort_by(|a, b| b.score.total.cmp(&a.score.total));

    let mut sectors: HashSet<String> = excluded_sectors.clone();
    let mut picks = Vec::with_capacity(max_picks);
    let mut skipped = Vec::new();
    for candidate in candidates {
        if picks.len() >= max_picks {
            break;
        }
        if sectors.insert(candidate.sector.clone()) {
            picks.push(candidate);
        } else {
            skipped.push(candidate);
        }
    }

    if relax {
        for candidate in skipped {
            if picks.len() >= max_picks {
                break;
            }
            picks.push(candidate);
        }
        picks.sort_by(|a, b| b.score.total.cmp(&a.score.total));
    }
    picks
}

/// Scans a universe on a bounded worker pool.
pub struct HybridSignalGenerator {
    source: Arc<dyn MarketDataSource>,
    clock: Arc<dyn Clock>,
    calendar: ExchangeCalendar,
    universe: Universe,
    planner: Arc<LevelPlanner>,
    market_filter: MarketFilter,
    config: ScanConfig,
}

type TickerResult = (String, Result<Signal, ScanError>);

impl HybridSignalGenerator {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        clock: Arc<dyn Clock>,
        calendar: ExchangeCalendar,
        universe: Universe,
        config: ScanConfig,
    ) -> Self {
        let market_filter = MarketFilter::new(
            Arc::clone(&source),
            Arc::clone(&clock),
            config.index_ticker.clone(),
            config.market_filter_ttl_secs,
        );
        Self {
            planner: Arc::new(LevelPlanner::new(&universe)),
            source,
            clock,
            calendar,
            universe,
            market_filter,
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn MarketDataSource> {
        &self.source
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn calendar(&self) -> &ExchangeCalendar {
        &self.calendar
    }

    pub fn market_filter(&self) -> &MarketFilter {
        &self.market_filter
    }

    /// Current gates plus the warnings they raise.
    pub fn gate(&self) -> (GateState, TradingPhase, Vec<String>) {
        let now = self.clock.now();
        let phase = self.calendar.phase_at(now);
        let market = self.market_filter.state();
        let mut warnings = Vec::new();
        if !phase.allows_new_entries() {
            warnings.push(format!(
                "time gate: phase {phase:?}, BUY recommendations downgraded to WAIT"
            ));
        }
        if let Some(w) = market.warning {
            warnings.push(w);
        }
        let gate = GateState {
            market_ok: market.ok,
            time_safe: phase.allows_new_entries(),
        };
        (gate, phase, warnings)
    }

    /// Same pipeline as the scan for one symbol; no ranking or diversification.
    pub fn per_ticker_signal(
        &self,
        ticker: &str,
        interval: Interval,
        period: Period,
    ) -> Result<Signal, ScanError> {
        let ticker = bistlab_core::data::normalize_ticker(ticker);
        let series = self.source.fetch_bars(&ticker, interval, period)?;
        let (gate, _, _) = self.gate();
        evaluate_series(&series, gate, &self.planner, self.clock.now())
    }

    /// Scan the universe and return the diversified pick list.
    pub fn daily_picks(&self, max_picks: usize, min_score: u8) -> DailyPicks {
        let started = Instant::now();
        let now = self.clock.now();
        let (gate, phase, mut warnings) = self.gate();

        let tickers = self.universe.all_tickers();
        let results = self.scan(&tickers, gate, now, &mut warnings);

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        let mut synthetic = Vec::new();
        for (ticker, result) in results {
            match result {
                Ok(signal) => {
                    if signal.is_synthetic() {
                        synthetic.push(ticker.clone());
                    }
                    if signal.score.total >= min_score {
                        candidates.push(signal);
                    }
                }
                Err(e) => {
                    warn!(ticker = %ticker, kind = %e.kind(), error = %e, "ticker skipped");
                    failures.push(TickerFailure::new(&ticker, &e));
                }
            }
        }

        if !synthetic.is_empty() {
            warnings.push(format!("synthetic data used for: {}", synthetic.join(", ")));
        }

        let picks = if failures.len() * 2 > tickers.len() {
            warnings.push(format!(
                "data_quality: {} of {} tickers failed, no picks emitted",
                failures.len(),
                tickers.len()
            ));
            Vec::new()
        } else {
            select_picks(
                candidates,
                max_picks,
                self.config.relax_diversification,
                &HashSet::new(),
                &HashSet::new(),
            )
        };

        info!(
            scanned = tickers.len(),
            picks = picks.len(),
            failures = failures.len(),
            market_ok = gate.market_ok,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "daily scan complete"
        );

        DailyPicks {
            scan_date: self.calendar.local_date(now),
            scan_time: now,
            market_ok: gate.market_ok,
            phase,
            picks,
            warnings,
            strategy_version: STRATEGY_VERSION.to_string(),
            scanned: tickers.len(),
            failures,
        }
    }

    /// Fan out one job per ticker and collect until every job reported or the
    /// deadline passed. Results come back in ticker order.
    fn scan(
        &self,
        tickers: &[String],
        gate: GateState,
        now: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> Vec<TickerResult> {
        if tickers.is_empty() {
            return Vec::new();
        }
        let threads = tickers.len().min(self.config.workers).max(1);
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("scan-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                let err = ScanError::Pool(e.to_string());
                return tickers
                    .iter()
                    .map(|t| (t.clone(), Err(ScanError::Pool(err.to_string()))))
                    .collect();
            }
        };

        let (tx, rx) = mpsc::channel::<TickerResult>();
        for ticker in tickers {
            let tx = tx.clone();
            let ticker = ticker.clone();
            let source = Arc::clone(&self.source);
            let planner = Arc::clone(&self.planner);
            let (interval, period) = (self.config.interval, self.config.period);
            pool.spawn(move || {
                debug!(ticker = %ticker, "scanning");
                let result = source
                    .fetch_bars(&ticker, interval, period)
                    .map_err(ScanError::from)
                    .and_then(|series| evaluate_series(&series, gate, &planner, now));
                // The coordinator may have given up; a closed channel is fine.
                let _ = tx.send((ticker, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + Duration::from_secs(self.config.scan_deadline_secs);
        let mut results = Vec::with_capacity(tickers.len());
        while results.len() < tickers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(r) => results.push(r),
                Err(_) => break,
            }
        }

        if results.len() < tickers.len() {
            let after_secs = self.config.scan_deadline_secs;
            let done: HashSet<String> = results.iter().map(|(t, _)| t.clone()).collect();
            let abandoned: Vec<String> = tickers
                .iter()
                .filter(|t| !done.contains(*t))
                .cloned()
                .collect();
            warn!(abandoned = abandoned.len(), "scan deadline reached");
            warnings.push(format!(
                "scan deadline of {after_secs}s reached, omitted: {}",
                abandoned.join(", ")
            ));
            results.extend(abandoned.into_iter().map(|ticker| {
                let err = ScanError::Deadline {
                    ticker: ticker.clone(),
                    after_secs,
                };
                (ticker, Err(err))
            }));
        }

        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistlab_core::levels::Levels;
    use bistlab_core::scoring::{Quality, Recommendation, Score};
    use bistlab_core::LevelSource;

    fn candidate(ticker: &str, sector: &str, total: u8) -> Signal {
        Signal {
            ticker: ticker.to_string(),
            sector: sector.to_string(),
            score: Score {
                total,
                trend: 0,
                momentum: 0,
                position: 0,
                volume: 0,
                recommendation: Recommendation::Buy,
                quality: Quality::Excellent,
                reasons: Vec::new(),
                missing_indicators: Vec::new(),
            },
            levels: Levels {
                entry: 100.0,
                stop_loss: 96.0,
                tp1: 110.0,
                tp2: 116.0,
                atr: 2.0,
                atr_pct: 2.0,
                sl_pct: 4.0,
                tp_pct: 10.0,
                rr1: 2.5,
                rr2: 4.0,
                max_hold_days: 10,
                sector: sector.to_string(),
                stop_source: LevelSource::AtrBased,
                target_source: LevelSource::AtrBased,
            },
            reasons: Vec::new(),
            generated_at: Utc::now(),
            data_source: DataSource::Static,
        }
    }

    fn ranked() -> Vec<Signal> {
        vec![
            candidate("A", "Bank", 90),
            candidate("B", "Bank", 85),
            candidate("C", "Retail", 80),
            candidate("D", "Auto", 75),
            candidate("E", "Bank", 72),
            candidate("F", "Energy", 70),
        ]
    }

    fn tickers(picks: &[Signal]) -> Vec<&str> {
        picks.iter().map(|s| s.ticker.as_str()).collect()
    }

    #[test]
    fn one_pick_per_sector() {
        let picks = select_picks(ranked(), 3, false, &HashSet::new(), &HashSet::new());
        assert_eq!(tickers(&picks), vec!["A", "C", "D"]);
    }

    #[test]
    fn input_order_does_not_matter_for_distinct_scores() {
        let mut shuffled = ranked();
        shuffled.reverse();
        let picks = select_picks(shuffled, 3, false, &HashSet::new(), &HashSet::new());
        assert_eq!(tickers(&picks), vec!["A", "C", "D"]);
    }

    #[test]
    fn no_relaxation_leaves_slots_empty() {
        let picks = select_picks(ranked(), 6, false, &HashSet::new(), &HashSet::new());
        assert_eq!(tickers(&picks), vec!["A", "C", "D", "F"]);
    }

    #[test]
    fn relaxation_fills_in_rank_order() {
        let picks = select_picks(ranked(), 5, true, &HashSet::new(), &HashSet::new());
        assert_eq!(tickers(&picks), vec!["A", "B", "C", "D", "F"]);
    }

    #[test]
    fn exclusions_apply() {
        let held: HashSet<String> = ["A".to_string()].into();
        let used: HashSet<String> = ["Retail".to_string()].into();
        let picks = select_picks(ranked(), 3, false, &held, &used);
        assert_eq!(tickers(&picks), vec!["B", "D", "F"]);
    }

    #[test]
    fn equal_scores_keep_caller_order() {
        let c = vec![
            candidate("X", "S1", 80),
            candidate("W", "S2", 80),
            candidate("V", "S3", 80),
        ];
        let picks = select_picks(c, 2, false, &HashSet::new(), &HashSet::new());
        assert_eq!(tickers(&picks), vec!["X", "W"]);
    }

    #[test]
    fn failure_carries_kind() {
        let err = ScanError::InsufficientHistory {
            ticker: "AKBNK".into(),
            bars: 10,
            required: 50,
        };
        let f = TickerFailure::new("AKBNK", &err);
        assert_eq!(f.kind, ErrorKind::InsufficientHistory);
        assert!(f.message.contains("10 bars"));
    }
}
