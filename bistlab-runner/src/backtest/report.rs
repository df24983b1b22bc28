//! Backtest output: trade records, equity curve, report, and exports.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::metrics::{BacktestMetrics, SectorStats};
use super::position::{ExitLeg, ExitReason, Position};
use super::BacktestError;
use crate::config::BacktestConfig;

/// A fully closed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub ticker: String,
    pub sector: String,
    pub score: u8,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub entry_price: f64,
    pub shares: u64,
    pub initial_stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    /// Reason of the final leg.
    pub exit_reason: ExitReason,
    pub legs: Vec<ExitLeg>,
    pub gross_pnl: f64,
    pub commission: f64,
    pub slippage: f64,
    pub net_pnl: f64,
    /// Net PnL over entry notional, percent.
    pub return_pct: f64,
    pub holding_days: u32,
}

impl TradeRecord {
    /// `None` while the position still holds shares.
    pub fn from_position(p: &Position) -> Option<Self> {
        if !p.is_closed() {
            return None;
        }
        let last = p.legs.last()?;
        let gross_pnl: f64 = p
            .legs
            .iter()
            .map(|l| (l.price - p.entry_price) * l.shares as f64)
            .sum();
        let commission = p.entry_commission + p.legs.iter().map(|l| l.commission).sum::<f64>();
        let slippage = p.entry_slippage + p.legs.iter().map(|l| l.slippage).sum::<f64>();
        let net_pnl = gross_pnl - commission - slippage;
        let notional = p.entry_price * p.shares as f64;
        Some(Self {
            ticker: p.ticker.clone(),
            sector: p.sector.clone(),
            score: p.score,
            entry_date: p.entry_date,
            exit_date: last.date,
            entry_price: p.entry_price,
            shares: p.shares,
            initial_stop: p.initial_stop,
            tp1: p.tp1,
            tp2: p.tp2,
            exit_reason: last.reason,
            legs: p.legs.clone(),
            gross_pnl,
            commission,
            slippage,
            net_pnl,
            return_pct: if notional > 0.0 {
                net_pnl / notional * 100.0
            } else {
                0.0
            },
            holding_days: p.days_held,
        })
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub sector_stats: Vec<SectorStats>,
    pub warnings: Vec<String>,
    /// Any input series was synthetic.
    pub has_synthetic: bool,
    /// BLAKE3 of the serialized trades and metrics.
    pub run_hash: String,
}

/// Hash identifying a run's outcome. Equal inputs give equal hashes.
pub fn run_hash(trades: &[TradeRecord], metrics: &BacktestMetrics) -> String {
    let mut hasher = blake3::Hasher::new();
    // Serializing plain data with derived impls cannot fail.
    if let Ok(bytes) = serde_json::to_vec(&(trades, metrics)) {
        hasher.update(&bytes);
    }
    hasher.finalize().to_hex().to_string()
}

// ─── Exports ────────────────────────────────────────────────────────

pub fn export_json(report: &BacktestReport) -> Result<String, BacktestError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// One row per exit leg. Columns: ticker, sector, score, entry_date,
/// entry_price, shares, initial_stop, tp1, tp2, exit_date, exit_price,
/// exit_shares, fraction, reason, commission, slippage, leg_net_pnl,
/// trade_net_pnl, trade_return_pct, holding_days
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String, BacktestError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "ticker",
        "sector",
        "score",
        "entry_date",
        "entry_price",
        "shares",
        "initial_stop",
        "tp1",
        "tp2",
        "exit_date",
        "exit_price",
        "exit_shares",
        "fraction",
        "reason",
        "commission",
        "slippage",
        "leg_net_pnl",
        "trade_net_pnl",
        "trade_return_pct",
        "holding_days",
    ])?;

    for t in trades {
        for leg in &t.legs {
            wtr.write_record([
                t.ticker.clone(),
                t.sector.clone(),
                t.score.to_string(),
                t.entry_date.to_string(),
                format!("{:.4}", t.entry_price),
                t.shares.to_string(),
                format!("{:.4}", t.initial_stop),
                format!("{:.4}", t.tp1),
                format!("{:.4}", t.tp2),
                leg.date.to_string(),
                format!("{:.4}", leg.price),
                leg.shares.to_string(),
                format!("{:.2}", leg.fraction),
                leg.reason.as_str().to_string(),
                format!("{:.2}", leg.commission),
                format!("{:.2}", leg.slippage),
                format!("{:.2}", leg.net_pnl),
                format!("{:.2}", t.net_pnl),
                format!("{:.4}", t.return_pct),
                t.holding_days.to_string(),
            ])?;
        }
    }

    let data = wtr
        .into_inner()
        .map_err(|e| BacktestError::Export(e.to_string()))?;
    String::from_utf8(data).map_err(|e| BacktestError::Export(e.to_string()))
}

pub fn export_equity_csv(equity: &[EquityPoint]) -> Result<String, BacktestError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "equity"])?;
    for p in equity {
        wtr.write_record([p.date.to_string(), format!("{:.2}", p.equity)])?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| BacktestError::Export(e.to_string()))?;
    String::from_utf8(data).map_err(|e| BacktestError::Export(e.to_string()))
}

/// Write `report.json`, `trades.csv` and `equity.csv` into
/// `output_dir/backtest_<start>_<end>_<hash8>/` and return that directory.
pub fn save_artifacts(report: &BacktestReport, output_dir: &Path) -> Result<PathBuf, BacktestError> {
    let short_hash = report.run_hash.get(..8).unwrap_or(&report.run_hash);
    let run_dir = output_dir.join(format!(
        "backtest_{}_{}_{}",
        report.config.start, report.config.end, short_hash
    ));
    let io = |path: &Path| {
        let path = path.display().to_string();
        move |source| BacktestError::Io { path, source }
    };
    fs::create_dir_all(&run_dir).map_err(io(run_dir.as_path()))?;

    let files = [
        ("report.json", export_json(report)?),
        ("trades.csv", export_trades_csv(&report.trades)?),
        ("equity.csv", export_equity_csv(&report.equity_curve)?),
    ];
    for (name, content) in files {
        let path = run_dir.join(name);
        fs::write(&path, content).map_err(io(path.as_path()))?;
    }
    Ok(run_dir)
}
