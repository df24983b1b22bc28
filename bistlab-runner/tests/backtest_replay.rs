//! Backtester runs over a year of synthetic BIST-30 history.

use std::sync::Arc;

use bistlab_core::data::SyntheticSource;
use bistlab_core::universe::INDEX_TICKER;
use bistlab_core::{Clock, ExchangeCalendar, ManualClock, Period, Universe};
use bistlab_runner::backtest::{save_artifacts, ExitReason};
use bistlab_runner::{load_history, BacktestConfig, Backtester, EntryMode, History};
use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

fn history() -> History {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 2, 16, 0, 0).unwrap(),
    ));
    let source = SyntheticSource::new(clock, ExchangeCalendar::bist());
    let tickers = Universe::bist30().all_tickers();
    load_history(&source, &tickers, INDEX_TICKER, Period::TwoYears)
}

fn run(config: BacktestConfig, history: &History) -> bistlab_runner::BacktestReport {
    Backtester::new(config, &Universe::bist30(), ExchangeCalendar::bist())
        .unwrap()
        .run(history)
        .unwrap()
}

#[test]
fn two_runs_are_identical() {
    let history = history();
    let a = run(BacktestConfig::default(), &history);
    let b = run(BacktestConfig::default(), &history);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.metrics, b.metrics);
    assert_eq!(a.run_hash, b.run_hash);
    assert!(a.has_synthetic);
}

#[test]
fn accounting_is_consistent() {
    let history = history();
    let config = BacktestConfig::default();
    let report = run(config.clone(), &history);

    let trading_days = ExchangeCalendar::bist().trading_days(config.start, config.end);
    assert_eq!(report.equity_curve.len(), trading_days.len());

    let net: f64 = report.trades.iter().map(|t| t.net_pnl).sum();
    let final_equity = report.equity_curve.last().unwrap().equity;
    assert!(
        (final_equity - (config.initial_capital + net)).abs() < 1e-6 * config.initial_capital,
        "final {final_equity} vs capital + net {}",
        config.initial_capital + net
    );
    assert!((report.metrics.final_equity - final_equity).abs() < 1e-9);

    for t in &report.trades {
        assert!(t.entry_date >= config.start && t.exit_date <= config.end);
        assert!(t.entry_date <= t.exit_date);
        let sold: u64 = t.legs.iter().map(|l| l.shares).sum();
        assert_eq!(sold, t.shares, "{}: legs must close the whole position", t.ticker);
        assert!(t.legs.len() <= 2);
        if t.legs.len() == 2 {
            assert_eq!(t.legs[0].reason, ExitReason::TakeProfit1);
        }
        assert!(t.score >= config.min_score);
    }
}

#[test]
fn one_position_per_sector_at_a_time() {
    let history = history();
    let report = run(BacktestConfig::default(), &history);
    for (i, a) in report.trades.iter().enumerate() {
        for b in &report.trades[i + 1..] {
            if a.sector != b.sector {
                continue;
            }
            let overlap = a.entry_date < b.exit_date && b.entry_date < a.exit_date;
            assert!(!overlap, "{} and {} overlap in {}", a.ticker, b.ticker, a.sector);
        }
    }
}

#[test]
fn costs_never_help() {
    let history = history();
    let free = BacktestConfig {
        commission_bps: 0.0,
        slippage_bps: 0.0,
        entry_mode: EntryMode::SameBarClose,
        ..BacktestConfig::default()
    };
    let costly = BacktestConfig {
        commission_bps: 20.0,
        slippage_bps: 10.0,
        ..free.clone()
    };
    let a = run(free, &history);
    let b = run(costly, &history);
    assert!(a.trades.iter().all(|t| t.commission == 0.0 && t.slippage == 0.0));
    assert!(b.trades.iter().all(|t| t.commission > 0.0));
    assert!(a.trades.iter().all(|t| (t.net_pnl - t.gross_pnl).abs() < 1e-6));
    assert!(b.trades.iter().all(|t| t.net_pnl < t.gross_pnl));
    // Sizing differs with costs, but the first entry is chosen before any fill.
    if let (Some(x), Some(y)) = (
        a.trades.iter().min_by_key(|t| (t.entry_date, t.ticker.clone())),
        b.trades.iter().min_by_key(|t| (t.entry_date, t.ticker.clone())),
    ) {
        assert_eq!(x.entry_date, y.entry_date);
    }
}

#[test]
fn artifacts_are_written() {
    let history = history();
    let config = BacktestConfig {
        start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 8, 30).unwrap(),
        ..BacktestConfig::default()
    };
    let report = run(config, &history);
    let tmp = TempDir::new().unwrap();
    let dir = save_artifacts(&report, tmp.path()).unwrap();
    for name in ["report.json", "trades.csv", "equity.csv"] {
        assert!(dir.join(name).exists(), "{name} missing");
    }
    let json = std::fs::read_to_string(dir.join("report.json")).unwrap();
    let back: bistlab_runner::BacktestReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.run_hash, report.run_hash);
}
