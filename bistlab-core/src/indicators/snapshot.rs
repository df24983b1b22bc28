//! Indicator frame (full aligned vectors) and per-bar snapshots.
//!
//! The frame is computed once per series; every vector is causal, so the
//! snapshot at bar `i` equals the snapshot of the prefix `bars[..=i]`. The
//! backtester relies on this to avoid recomputing indicators for every day.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::adx::{adx, AdxOutput};
use super::atr::atr;
use super::bollinger::{bollinger, BollingerBands};
use super::cci::cci;
use super::ema::ema;
use super::macd::{macd, MacdOutput};
use super::mfi::mfi;
use super::obv::obv;
use super::rsi::rsi;
use super::sma::{rolling_max, rolling_min, sma};
use super::stochastic::{stochastic, StochasticOutput};
use super::structure::{pivot_points, support_resistance, PivotPoints, SupportResistance};
use super::vwap::vwap;
use super::{value_at, EPSILON};
use crate::domain::Bar;

/// Bars in the recent high/low window used for the position score.
pub const RECENT_WINDOW: usize = 10;
/// Window for support/resistance extrema detection.
pub const SR_WINDOW: usize = 20;
/// How far back support/resistance looks.
const SR_LOOKBACK: usize = 120;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendIndicators {
    pub ema9: Option<f64>,
    pub ema21: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub adx: Option<f64>,
    pub plus_di: Option<f64>,
    pub minus_di: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumIndicators {
    pub rsi: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub cci: Option<f64>,
    pub mfi: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilityIndicators {
    pub atr: Option<f64>,
    pub atr_pct: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_percent_b: Option<f64>,
    pub bb_width: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeIndicators {
    pub volume: f64,
    pub volume_sma20: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub obv: Option<f64>,
    pub vwap: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStructure {
    pub recent_high: Option<f64>,
    pub recent_low: Option<f64>,
    pub levels: SupportResistance,
    pub pivots: Option<PivotPoints>,
}

/// Indicator values for one bar, grouped by family. Absent values are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub trend: TrendIndicators,
    pub momentum: MomentumIndicators,
    pub volatility: VolatilityIndicators,
    pub volume: VolumeIndicators,
    pub structure: PriceStructure,
}

impl IndicatorSnapshot {
    /// Snapshot of the last bar. `None` for an empty slice.
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let last = bars.len().checked_sub(1)?;
        IndicatorFrame::compute(bars).snapshot_at(last)
    }

    /// A snapshot carrying only a close and an ATR, for planning levels
    /// outside a full pipeline run.
    pub fn minimal(timestamp: DateTime<Utc>, close: f64, atr: Option<f64>) -> Self {
        Self {
            timestamp,
            close,
            trend: TrendIndicators::default(),
            momentum: MomentumIndicators::default(),
            volatility: VolatilityIndicators {
                atr,
                atr_pct: atr.map(|a| a / close * 100.0),
                ..VolatilityIndicators::default()
            },
            volume: VolumeIndicators::default(),
            structure: PriceStructure::default(),
        }
    }
}

/// Full indicator vectors over one bar slice.
#[derive(Debug, Clone)]
pub struct IndicatorFrame<'a> {
    bars: &'a [Bar],
    ema9: Vec<f64>,
    ema21: Vec<f64>,
    ema50: Vec<f64>,
    ema200: Vec<f64>,
    sma20: Vec<f64>,
    sma50: Vec<f64>,
    macd: MacdOutput,
    adx: AdxOutput,
    rsi: Vec<f64>,
    stoch: StochasticOutput,
    cci: Vec<f64>,
    mfi: Vec<f64>,
    atr: Vec<f64>,
    bollinger: BollingerBands,
    obv: Vec<f64>,
    vwap: Vec<f64>,
    volume_sma20: Vec<f64>,
    recent_high: Vec<f64>,
    recent_low: Vec<f64>,
}

impl<'a> IndicatorFrame<'a> {
    pub fn compute(bars: &'a [Bar]) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

        Self {
            bars,
            ema9: ema(&closes, 9),
            ema21: ema(&closes, 21),
            ema50: ema(&closes, 50),
            ema200: ema(&closes, 200),
            sma20: sma(&closes, 20),
            sma50: sma(&closes, 50),
            macd: macd(&closes, 12, 26, 9),
            adx: adx(bars, 14),
            rsi: rsi(&closes, 14),
            stoch: stochastic(bars, 14, 3, 3),
            cci: cci(bars, 20),
            mfi: mfi(bars, 14),
            atr: atr(bars, 14),
            bollinger: bollinger(&closes, 20, 2.0),
            obv: obv(bars),
            vwap: vwap(bars),
            volume_sma20: sma(&volumes, 20),
            recent_high: rolling_max(&highs, RECENT_WINDOW),
            recent_low: rolling_min(&lows, RECENT_WINDOW),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub fn snapshot_at(&self, i: usize) -> Option<IndicatorSnapshot> {
        let bar = self.bars.get(i)?;
        let close = bar.close;
        let at = |v: &[f64]| value_at(v, i);

        let atr = at(&self.atr);
        let volume = bar.volume as f64;
        let volume_sma20 = at(&self.volume_sma20);
        let bb_ok = at(&self.bollinger.middle).is_some();

        let sr_start = (i + 1).saturating_sub(SR_LOOKBACK);
        let levels = support_resistance(&self.bars[sr_start..=i], SR_WINDOW);

        Some(IndicatorSnapshot {
            timestamp: bar.timestamp,
            close,
            trend: TrendIndicators {
                ema9: at(&self.ema9),
                ema21: at(&self.ema21),
                ema50: at(&self.ema50),
                ema200: at(&self.ema200),
                sma20: at(&self.sma20),
                sma50: at(&self.sma50),
                macd: at(&self.macd.line),
                macd_signal: at(&self.macd.signal),
                macd_histogram: at(&self.macd.histogram),
                adx: at(&self.adx.adx),
                plus_di: at(&self.adx.plus_di),
                minus_di: at(&self.adx.minus_di),
            },
            momentum: MomentumIndicators {
                rsi: at(&self.rsi),
                stoch_k: at(&self.stoch.k),
                stoch_d: at(&self.stoch.d),
                cci: at(&self.cci),
                mfi: at(&self.mfi),
            },
            volatility: VolatilityIndicators {
                atr,
                atr_pct: atr.map(|a| a / (close + EPSILON) * 100.0),
                bb_upper: at(&self.bollinger.upper),
                bb_middle: at(&self.bollinger.middle),
                bb_lower: at(&self.bollinger.lower),
                bb_percent_b: bb_ok
                    .then(|| self.bollinger.percent_b(i, close))
                    .filter(|v| v.is_finite()),
                bb_width: bb_ok
                    .then(|| self.bollinger.width(i))
                    .filter(|v| v.is_finite()),
            },
            volume: VolumeIndicators {
                volume,
                volume_sma20,
                volume_ratio: volume_sma20.map(|avg| volume / (avg + EPSILON)),
                obv: at(&self.obv),
                vwap: at(&self.vwap),
            },
            structure: PriceStructure {
                recent_high: at(&self.recent_high),
                recent_low: at(&self.recent_low),
                levels,
                pivots: Some(pivot_points(bar)),
            },
        })
    }
}
