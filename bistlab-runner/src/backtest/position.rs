//! Position lifecycle: `OPEN → (PARTIAL_TP1 →)? CLOSED`.
//!
//! Prices on a position are raw bar/level prices. Slippage and commission are
//! tracked as separate cost amounts by the caller's [`CostModel`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use bistlab_core::Bar;

/// Gain at the close that arms the trailing stop.
pub const TRAIL_TRIGGER: f64 = 0.04;
/// Trailing stop distance below the close.
pub const TRAIL_DISTANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    PartialTp1,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TimeOut,
    EndOfData,
    TrailStop,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_LOSS",
            Self::TakeProfit1 => "TAKE_PROFIT_1",
            Self::TakeProfit2 => "TAKE_PROFIT_2",
            Self::TimeOut => "TIME_OUT",
            Self::EndOfData => "END_OF_DATA",
            Self::TrailStop => "TRAIL_STOP",
        }
    }
}

/// Commission and slippage, both in basis points of fill notional.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostModel {
    pub commission_bps: f64,
    pub slippage_bps: f64,
}

impl CostModel {
    pub fn commission(&self, notional: f64) -> f64 {
        notional.abs() * self.commission_bps / 10_000.0
    }

    pub fn slippage(&self, notional: f64) -> f64 {
        notional.abs() * self.slippage_bps / 10_000.0
    }

    /// Cash needed per share at `price`, costs included.
    pub fn cost_per_share(&self, price: f64) -> f64 {
        price * (1.0 + (self.commission_bps + self.slippage_bps) / 10_000.0)
    }
}

/// One exit fill. A position closes in one or two legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLeg {
    pub date: NaiveDate,
    pub price: f64,
    pub shares: u64,
    /// Share of the original size closed by this leg.
    pub fraction: f64,
    pub reason: ExitReason,
    pub commission: f64,
    pub slippage: f64,
    /// Net of this leg's exit costs and its pro-rata share of entry costs.
    pub net_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub sector: String,
    pub score: u8,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub shares: u64,
    pub remaining: u64,
    pub entry_commission: f64,
    pub entry_slippage: f64,
    pub initial_stop: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub max_hold_days: u32,
    /// Bars processed since entry.
    pub days_held: u32,
    /// The current stop was raised by the trailing rule.
    pub trailed: bool,
    pub state: PositionState,
    pub legs: Vec<ExitLeg>,
}

/// Levels a position is opened with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plan {
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub max_hold_days: u32,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        ticker: impl Into<String>,
        sector: impl Into<String>,
        score: u8,
        date: NaiveDate,
        price: f64,
        shares: u64,
        plan: Plan,
        costs: &CostModel,
    ) -> Self {
        let notional = price * shares as f64;
        Self {
            ticker: ticker.into(),
            sector: sector.into(),
            score,
            entry_date: date,
            entry_price: price,
            shares,
            remaining: shares,
            entry_commission: costs.commission(notional),
            entry_slippage: costs.slippage(notional),
            initial_stop: plan.stop,
            stop: plan.stop,
            tp1: plan.tp1,
            tp2: plan.tp2,
            max_hold_days: plan.max_hold_days,
            days_held: 0,
            trailed: false,
            state: PositionState::Open,
            legs: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }

    /// Cash paid at entry, costs included.
    pub fn entry_cash(&self) -> f64 {
        self.entry_price * self.shares as f64 + self.entry_commission + self.entry_slippage
    }

    pub fn market_value(&self, price: f64) -> f64 {
        price * self.remaining as f64
    }

    /// Apply one bar. At most one exit action fires, in the order stop, TP1
    /// partial, TP2, time-out; the trailing stop moves only when none did.
    /// Returns the exit leg, if any.
    pub fn on_bar(&mut self, date: NaiveDate, bar: &Bar, costs: &CostModel) -> Option<ExitLeg> {
        if self.is_closed() {
            return None;
        }
        self.days_held += 1;

        if bar.low <= self.stop {
            // Gapped through: the open is the first price available.
            let price = if bar.open < self.stop { bar.open } else { self.stop };
            let reason = if self.trailed {
                ExitReason::TrailStop
            } else {
                ExitReason::StopLoss
            };
            return Some(self.close_remaining(date, price, reason, costs));
        }

        if self.state == PositionState::Open && bar.high >= self.tp1 {
            let half = self.shares / 2;
            if half == 0 {
                return Some(self.close_remaining(date, self.tp1, ExitReason::TakeProfit1, costs));
            }
            let leg = self.exit(date, self.tp1, half, ExitReason::TakeProfit1, costs);
            self.state = PositionState::PartialTp1;
            if self.entry_price > self.stop {
                self.stop = self.entry_price;
                self.trailed = false;
            }
            return Some(leg);
        }

        if bar.high >= self.tp2 {
            return Some(self.close_remaining(date, self.tp2, ExitReason::TakeProfit2, costs));
        }

        if self.days_held >= self.max_hold_days {
            return Some(self.close_remaining(date, bar.close, ExitReason::TimeOut, costs));
        }

        if bar.close >= self.entry_price * (1.0 + TRAIL_TRIGGER) {
            let candidate = bar.close * (1.0 - TRAIL_DISTANCE);
            if candidate > self.stop {
                self.stop = candidate;
                self.trailed = true;
            }
        }
        None
    }

    /// Close whatever is left at `price`.
    pub fn close_remaining(
        &mut self,
        date: NaiveDate,
        price: f64,
        reason: ExitReason,
        costs: &CostModel,
    ) -> ExitLeg {
        let leg = self.exit(date, price, self.remaining, reason, costs);
        self.state = PositionState::Closed;
        leg
    }

    fn exit(
        &mut self,
        date: NaiveDate,
        price: f64,
        shares: u64,
        reason: ExitReason,
        costs: &CostModel,
    ) -> ExitLeg {
        let shares = shares.min(self.remaining);
        self.remaining -= shares;
        let fraction = if self.shares == 0 {
            0.0
        } else {
            shares as f64 / self.shares as f64
        };
        let notional = price * shares as f64;
        let commission = costs.commission(notional);
        let slippage = costs.slippage(notional);
        let entry_costs = (self.entry_commission + self.entry_slippage) * fraction;
        let net_pnl = (price - self.entry_price) * shares as f64 - commission - slippage - entry_costs;
        let leg = ExitLeg {
            date,
            price,
            shares,
            fraction,
            reason,
            commission,
            slippage,
            net_pnl,
        };
        self.legs.push(leg.clone());
        leg
    }
}
