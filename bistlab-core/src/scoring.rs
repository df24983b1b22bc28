//! Hybrid trend-plus-pullback scorer.
//!
//! Four capped components add up to a 0-100 total:
//!
//! | Component | Max | Rule |
//! |-----------|-----|------|
//! | Trend     | 30  | close > EMA9 > EMA21 (+15), EMA21 > EMA50 (+10), close > EMA200 (+5) |
//! | Momentum  | 25  | RSI band (+15/+12/+6), MACD confirmation (+10/+7/+4) |
//! | Position  | 25  | close inside the 10-bar range, pullback zone scores highest |
//! | Volume    | 20  | volume / SMA20(volume) above 1.0, 1.2, 1.5 |
//!
//! The scorer never fails: missing inputs produce an `AVOID` score of zero with
//! the reason recorded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Bar;
use crate::error::ErrorKind;
use crate::indicators::snapshot::RECENT_WINDOW;
use crate::indicators::{IndicatorSnapshot, EPSILON};

/// Bars required before a ticker can be scored.
pub const MIN_SCORING_BARS: usize = 50;

pub const TREND_MAX: u8 = 30;
pub const MOMENTUM_MAX: u8 = 25;
pub const POSITION_MAX: u8 = 25;
pub const VOLUME_MAX: u8 = 20;

/// Reason tag for a series that could not be scored for lack of bars.
pub const REASON_INSUFFICIENT_HISTORY: &str = "insufficient_history";
/// Reason tag for absent required indicators.
pub const REASON_MISSING_INDICATORS: &str = "missing_indicators";
/// Reason tag for a zero-range price window.
pub const REASON_NUMERIC_DEGENERACY: &str = "numeric_degeneracy";

/// Market and time-of-day gates. A closed gate turns `BUY` into `WAIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub market_ok: bool,
    pub time_safe: bool,
}

impl GateState {
    pub fn open() -> Self {
        Self {
            market_ok: true,
            time_safe: true,
        }
    }

    pub fn is_open(&self) -> bool {
        self.market_ok && self.time_safe
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Buy,
    Wait,
    Watch,
    Avoid,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Buy => "BUY",
            Recommendation::Wait => "WAIT",
            Recommendation::Watch => "WATCH",
            Recommendation::Avoid => "AVOID",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Excellent,
    Good,
    Moderate,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub total: u8,
    pub trend: u8,
    pub momentum: u8,
    pub position: u8,
    pub volume: u8,
    pub recommendation: Recommendation,
    pub quality: Quality,
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_indicators: Vec<String>,
}

impl Score {
    /// Zero score with a single reason tag.
    pub fn avoid(reason: &str) -> Self {
        Self {
            total: 0,
            trend: 0,
            momentum: 0,
            position: 0,
            volume: 0,
            recommendation: Recommendation::Avoid,
            quality: Quality::Poor,
            reasons: vec![reason.to_string()],
            missing_indicators: Vec::new(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.recommendation == Recommendation::Buy
    }

    /// Error kind behind an `AVOID` produced by a guard, if any.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.total != 0 {
            return None;
        }
        self.reasons.iter().find_map(|r| match r.as_str() {
            REASON_INSUFFICIENT_HISTORY => Some(ErrorKind::InsufficientHistory),
            REASON_MISSING_INDICATORS => Some(ErrorKind::InsufficientHistory),
            REASON_NUMERIC_DEGENERACY => Some(ErrorKind::NumericDegeneracy),
            _ => None,
        })
    }

    pub fn components_within_caps(&self) -> bool {
        self.trend <= TREND_MAX
            && self.momentum <= MOMENTUM_MAX
            && self.position <= POSITION_MAX
            && self.volume <= VOLUME_MAX
            && self.total == self.trend + self.momentum + self.position + self.volume
    }
}

/// Recommendation and quality for a total before gating.
pub fn classify(total: u8) -> (Recommendation, Quality) {
    match total {
        70.. => (Recommendation::Buy, Quality::Excellent),
        60..=69 => (Recommendation::Buy, Quality::Good),
        50..=59 => (Recommendation::Watch, Quality::Moderate),
        _ => (Recommendation::Avoid, Quality::Poor),
    }
}

/// Stateless scorer. See the module docs for the rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer;

struct Required {
    ema9: f64,
    ema21: f64,
    ema50: f64,
    rsi: f64,
    macd: f64,
    macd_signal: f64,
    macd_histogram: f64,
    volume_ratio: f64,
    recent_high: f64,
    recent_low: f64,
}

impl Scorer {
    /// Score the last bar of `bars`, described by `snapshot`.
    pub fn score(bars: &[Bar], snapshot: &IndicatorSnapshot, gate: GateState) -> Score {
        if bars.len() < MIN_SCORING_BARS {
            return Score::avoid(REASON_INSUFFICIENT_HISTORY);
        }

        let req = match Self::required(snapshot) {
            Ok(req) => req,
            Err(missing) => {
                let mut score = Score::avoid(REASON_MISSING_INDICATORS);
                score.missing_indicators = missing.into_iter().map(String::from).collect();
                return score;
            }
        };

        if Self::is_degenerate(bars, &req) {
            return Score::avoid(REASON_NUMERIC_DEGENERACY);
        }

        let close = snapshot.close;
        let mut reasons = Vec::new();

        let mut trend = 0u8;
        if close > req.ema9 && req.ema9 > req.ema21 {
            trend += 15;
            reasons.push("close > EMA9 > EMA21".to_string());
        }
        if req.ema21 > req.ema50 {
            trend += 10;
            reasons.push("EMA21 > EMA50".to_string());
        }
        if let Some(ema200) = snapshot.trend.ema200 {
            if close > ema200 {
                trend += 5;
                reasons.push("close above EMA200".to_string());
            }
        }

        let mut momentum = match req.rsi {
            r if (40.0..=60.0).contains(&r) => 15,
            r if (35.0..=65.0).contains(&r) => 12,
            r if (30.0..=70.0).contains(&r) => 6,
            _ => 0,
        };
        if momentum > 0 {
            reasons.push(format!("RSI {:.1}", req.rsi));
        }
        let line_above = req.macd > req.macd_signal;
        let hist_positive = req.macd_histogram > 0.0;
        momentum += match (line_above, hist_positive) {
            (true, true) => 10,
            (true, false) => 7,
            (false, true) => 4,
            (false, false) => 0,
        };
        if line_above || hist_positive {
            reasons.push("MACD bullish".to_string());
        }

        let pos = (close - req.recent_low) / (req.recent_high - req.recent_low + EPSILON);
        let position = match pos {
            p if (0.20..=0.45).contains(&p) => 25,
            p if (0.15..=0.55).contains(&p) => 18,
            p if (0.10..=0.65).contains(&p) => 10,
            _ => 3,
        };
        if position >= 18 {
            reasons.push(format!("pullback position {:.0}%", pos * 100.0));
        }

        let volume = match req.volume_ratio {
            v if v > 1.5 => 20,
            v if v > 1.2 => 15,
            v if v > 1.0 => 10,
            _ => 0,
        };
        if volume > 0 {
            reasons.push(format!("volume {:.2}x average", req.volume_ratio));
        }

        let total = trend + momentum + position + volume;
        let (mut recommendation, quality) = classify(total);
        if recommendation == Recommendation::Buy && !gate.is_open() {
            recommendation = Recommendation::Wait;
            if !gate.market_ok {
                reasons.push("market filter closed".to_string());
            }
            if !gate.time_safe {
                reasons.push("outside buy window".to_string());
            }
        }

        Score {
            total,
            trend,
            momentum,
            position,
            volume,
            recommendation,
            quality,
            reasons,
            missing_indicators: Vec::new(),
        }
    }

    fn required(s: &IndicatorSnapshot) -> Result<Required, Vec<&'static str>> {
        let fields = [
            ("ema9", s.trend.ema9),
            ("ema21", s.trend.ema21),
            ("ema50", s.trend.ema50),
            ("rsi", s.momentum.rsi),
            ("macd", s.trend.macd),
            ("macd_signal", s.trend.macd_signal),
            ("macd_histogram", s.trend.macd_histogram),
            ("volume_ratio", s.volume.volume_ratio),
            ("recent_high", s.structure.recent_high),
            ("recent_low", s.structure.recent_low),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        let v = |i: usize| fields[i].1.unwrap_or(f64::NAN);
        Ok(Required {
            ema9: v(0),
            ema21: v(1),
            ema50: v(2),
            rsi: v(3),
            macd: v(4),
            macd_signal: v(5),
            macd_histogram: v(6),
            volume_ratio: v(7),
            recent_high: v(8),
            recent_low: v(9),
        })
    }

    fn is_degenerate(bars: &[Bar], req: &Required) -> bool {
        if req.recent_high - req.recent_low <= EPSILON {
            return true;
        }
        let tail = &bars[bars.len().saturating_sub(RECENT_WINDOW)..];
        match tail.first() {
            Some(first) => tail.iter().all(|b| b.close == first.close),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::make_bars;
    use chrono::Utc;

    fn wavy_bars() -> Vec<Bar> {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 5) as f64).collect();
        make_bars(&closes)
    }

    /// Every rule at its best band: 30 + 25 + 25 + 20.
    fn best_snapshot() -> IndicatorSnapshot {
        let mut s = IndicatorSnapshot::minimal(Utc::now(), 100.0, Some(2.0));
        s.trend.ema9 = Some(99.0);
        s.trend.ema21 = Some(98.0);
        s.trend.ema50 = Some(95.0);
        s.trend.ema200 = Some(90.0);
        s.trend.macd = Some(0.5);
        s.trend.macd_signal = Some(0.3);
        s.trend.macd_histogram = Some(0.2);
        s.momentum.rsi = Some(52.0);
        s.volume.volume_ratio = Some(1.6);
        s.structure.recent_high = Some(110.0);
        s.structure.recent_low = Some(96.0);
        s
    }

    #[test]
    fn best_case_scores_full_marks() {
        let score = Scorer::score(&wavy_bars(), &best_snapshot(), GateState::open());
        assert_eq!(score.total, 100);
        assert_eq!(
            (score.trend, score.momentum, score.position, score.volume),
            (30, 25, 25, 20)
        );
        assert_eq!(score.recommendation, Recommendation::Buy);
        assert_eq!(score.quality, Quality::Excellent);
        assert!(score.components_within_caps());
    }

    #[test]
    fn component_bands() {
        let bars = wavy_bars();
        let mut s = best_snapshot();
        s.trend.ema200 = None;
        s.momentum.rsi = Some(33.0);
        s.trend.macd = Some(0.1);
        s.trend.macd_signal = Some(0.3);
        s.trend.macd_histogram = Some(0.05);
        s.volume.volume_ratio = Some(1.1);
        s.structure.recent_low = Some(99.0); // pos = 1/11
        let score = Scorer::score(&bars, &s, GateState::open());
        assert_eq!(score.trend, 25);
        assert_eq!(score.momentum, 6 + 4);
        assert_eq!(score.position, 3);
        assert_eq!(score.volume, 10);
        assert_eq!(score.total, 48);
        assert_eq!(score.recommendation, Recommendation::Avoid);
    }

    #[test]
    fn flat_series_is_avoid() {
        let bars = make_bars(&[20.0; 120]);
        let snap = IndicatorSnapshot::from_bars(&bars).unwrap();
        let score = Scorer::score(&bars, &snap, GateState::open());
        assert_eq!(score.recommendation, Recommendation::Avoid);
        assert!(score.total <= 10);
        assert_eq!(score.failure_kind(), Some(ErrorKind::NumericDegeneracy));
    }

    #[test]
    fn short_series_is_insufficient() {
        let bars = make_bars(&[20.0, 21.0, 22.0]);
        let score = Scorer::score(&bars, &best_snapshot(), GateState::open());
        assert_eq!(score.total, 0);
        assert_eq!(score.reasons, vec![REASON_INSUFFICIENT_HISTORY]);
    }

    #[test]
    fn missing_indicators_are_listed() {
        let mut snap = best_snapshot();
        snap.trend.ema50 = None;
        snap.momentum.rsi = None;
        let score = Scorer::score(&wavy_bars(), &snap, GateState::open());
        assert_eq!(score.recommendation, Recommendation::Avoid);
        assert_eq!(score.total, 0);
        assert_eq!(score.missing_indicators, vec!["ema50", "rsi"]);
    }

    #[test]
    fn computed_snapshot_respects_caps() {
        let closes: Vec<f64> = (0..240)
            .map(|i| 50.0 + i as f64 * 0.2 + (i as f64 * 0.5).sin() * 2.0)
            .collect();
        let bars = make_bars(&closes);
        let snap = IndicatorSnapshot::from_bars(&bars).unwrap();
        let score = Scorer::score(&bars, &snap, GateState::open());
        assert!(score.components_within_caps());
        assert!(score.total <= 100);
    }

    #[test]
    fn closed_gate_downgrades_buy_to_wait() {
        let bars = wavy_bars();
        let snap = best_snapshot();
        let open = Scorer::score(&bars, &snap, GateState::open());
        let gate = GateState {
            market_ok: false,
            time_safe: true,
        };
        let closed = Scorer::score(&bars, &snap, gate);
        assert_eq!(open.recommendation, Recommendation::Buy);
        assert_eq!(closed.recommendation, Recommendation::Wait);
        assert_eq!(closed.quality, open.quality);
        assert_eq!(closed.total, open.total);
        assert!(closed.reasons.iter().any(|r| r == "market filter closed"));
    }

    #[test]
    fn outside_buy_window_downgrades_good_buy() {
        let mut snap = best_snapshot();
        snap.volume.volume_ratio = Some(0.5);
        snap.trend.ema200 = None;
        snap.trend.ema50 = Some(99.0); // EMA21 below EMA50
        let gate = GateState {
            market_ok: true,
            time_safe: false,
        };
        let score = Scorer::score(&wavy_bars(), &snap, gate);
        assert_eq!(score.total, 15 + 25 + 25);
        assert_eq!(score.quality, Quality::Good);
        assert_eq!(score.recommendation, Recommendation::Wait);
        assert!(score.reasons.iter().any(|r| r == "outside buy window"));
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(classify(100), (Recommendation::Buy, Quality::Excellent));
        assert_eq!(classify(70), (Recommendation::Buy, Quality::Excellent));
        assert_eq!(classify(69), (Recommendation::Buy, Quality::Good));
        assert_eq!(classify(60), (Recommendation::Buy, Quality::Good));
        assert_eq!(classify(59), (Recommendation::Watch, Quality::Moderate));
        assert_eq!(classify(50), (Recommendation::Watch, Quality::Moderate));
        assert_eq!(classify(49), (Recommendation::Avoid, Quality::Poor));
    }

    #[test]
    fn recommendation_serializes_upper_case() {
        let json = serde_json::to_string(&Recommendation::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");
        let back: Recommendation = serde_json::from_str("\"WAIT\"").unwrap();
        assert_eq!(back, Recommendation::Wait);
    }
}
