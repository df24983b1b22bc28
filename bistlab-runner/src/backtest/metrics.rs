//! Backtest metrics as pure functions over the trade list and equity curve.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::report::{EquityPoint, TradeRecord};

/// Annualisation factor for the per-trade Sharpe ratio.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of trades with positive net PnL; `wins` and `losses` split
    /// on the same rule.
    pub win_rate: f64,
    /// Mean net return of winning trades, percent.
    pub avg_win_pct: f64,
    /// Mean net return of non-winning trades, percent.
    pub avg_loss_pct: f64,
    pub profit_factor: f64,
    /// (final - initial) / initial.
    pub total_return: f64,
    pub sharpe: f64,
    /// Negative fraction, e.g. -0.12.
    pub max_drawdown: f64,
    pub avg_holding_days: f64,
    pub final_equity: f64,
}

impl BacktestMetrics {
    pub fn compute(trades: &[TradeRecord], equity: &[EquityPoint], initial_capital: f64) -> Self {
        let curve: Vec<f64> = equity.iter().map(|p| p.equity).collect();
        let final_equity = curve.last().copied().unwrap_or(initial_capital);
        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
        let (won, lost): (Vec<&TradeRecord>, Vec<&TradeRecord>) =
            trades.iter().partition(|t| t.is_winner());
        let wins: Vec<f64> = won.iter().map(|t| t.return_pct).collect();
        let losses: Vec<f64> = lost.iter().map(|t| t.return_pct).collect();
        Self {
            total_trades: trades.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: win_rate(trades),
            avg_win_pct: mean_f64(&wins),
            avg_loss_pct: mean_f64(&losses),
            profit_factor: profit_factor(trades),
            total_return: total_return(initial_capital, final_equity),
            sharpe: trade_sharpe(&returns),
            max_drawdown: max_drawdown(initial_capital, &curve),
            avg_holding_days: mean_f64(
                &trades
                    .iter()
                    .map(|t| t.holding_days as f64)
                    .collect::<Vec<_>>(),
            ),
            final_equity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorStats {
    pub sector: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub net_pnl: f64,
    pub avg_return_pct: f64,
}

/// Per-sector aggregates, sorted by sector name.
pub fn sector_stats(trades: &[TradeRecord]) -> Vec<SectorStats> {
    let mut by_sector: BTreeMap<&str, Vec<&TradeRecord>> = BTreeMap::new();
    for t in trades {
        by_sector.entry(t.sector.as_str()).or_default().push(t);
    }
    by_sector
        .into_iter()
        .map(|(sector, ts)| {
            let wins = ts.iter().filter(|t| t.is_winner()).count();
            let returns: Vec<f64> = ts.iter().map(|t| t.return_pct).collect();
            SectorStats {
                sector: sector.to_string(),
                trades: ts.len(),
                wins,
                win_rate: wins as f64 / ts.len() as f64,
                net_pnl: ts.iter().map(|t| t.net_pnl).sum(),
                avg_return_pct: mean_f64(&returns),
            }
        })
        .collect()
}

// ─── Individual metric functions ────────────────────────────────────

pub fn total_return(initial: f64, final_equity: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    (final_equity - initial) / initial
}

pub fn win_rate(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / gross loss, capped at 100.0 (all winners).
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.net_pnl > 0.0)
        .map(|t| t.net_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.net_pnl < 0.0)
        .map(|t| t.net_pnl.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

/// Sharpe from per-trade percentage returns: mean / std · √252.
/// Returns 0.0 with fewer than two trades or zero variance.
pub fn trade_sharpe(returns_pct: &[f64]) -> f64 {
    if returns_pct.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(returns_pct);
    let std = std_dev(returns_pct);
    if std < 1e-15 {
        return 0.0;
    }
    mean / std * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a negative fraction, measured from a peak that
/// starts at `initial_capital`. 0.0 for flat or rising curves.
pub fn max_drawdown(initial_capital: f64, equity_curve: &[f64]) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n-1).
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
