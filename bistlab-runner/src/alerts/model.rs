use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bistlab_core::Recommendation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    PriceAbove,
    PriceBelow,
    ScoreAbove,
    ScoreBelow,
    SignalBuy,
    PositionStop,
    PositionTp,
    NewIpo,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceAbove => "PRICE_ABOVE",
            Self::PriceBelow => "PRICE_BELOW",
            Self::ScoreAbove => "SCORE_ABOVE",
            Self::ScoreBelow => "SCORE_BELOW",
            Self::SignalBuy => "SIGNAL_BUY",
            Self::PositionStop => "POSITION_STOP",
            Self::PositionTp => "POSITION_TP",
            Self::NewIpo => "NEW_IPO",
        }
    }

    /// Needs a numeric threshold.
    pub fn needs_condition(self) -> bool {
        matches!(
            self,
            Self::PriceAbove | Self::PriceBelow | Self::ScoreAbove | Self::ScoreBelow
        )
    }

    /// Raised by collaborators through `record_external`, never by `evaluate`.
    pub fn is_external(self) -> bool {
        matches!(self, Self::PositionStop | Self::PositionTp | Self::NewIpo)
    }

    /// The live feed whose ticks can fire this kind.
    pub fn feed(self) -> Option<AlertFeed> {
        match self {
            Self::PriceAbove | Self::PriceBelow => Some(AlertFeed::Price),
            Self::ScoreAbove | Self::ScoreBelow | Self::SignalBuy => Some(AlertFeed::Score),
            Self::PositionStop | Self::PositionTp | Self::NewIpo => None,
        }
    }
}

/// Price ticks carry only a price; score ticks come from a full scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertFeed {
    Price,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub ticker: String,
    pub condition: Option<f64>,
    pub priority: Priority,
    pub message: String,
    pub active: bool,
    pub triggered: bool,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    /// Price or score observed when the alert fired.
    pub trigger_value: Option<f64>,
}

impl Alert {
    /// Eligible for evaluation.
    pub fn is_armed(&self) -> bool {
        self.active && !self.triggered && !self.kind.is_external()
    }

    /// The observed value, when `tick` satisfies this alert's rule.
    pub fn check(&self, tick: &MarketTick) -> Option<f64> {
        let threshold = self.condition;
        match self.kind {
            AlertKind::PriceAbove => tick.price.filter(|p| threshold.is_some_and(|x| *p >= x)),
            AlertKind::PriceBelow => tick.price.filter(|p| threshold.is_some_and(|x| *p <= x)),
            AlertKind::ScoreAbove => tick
                .score
                .map(f64::from)
                .filter(|s| threshold.is_some_and(|x| *s >= x)),
            AlertKind::ScoreBelow => tick
                .score
                .map(f64::from)
                .filter(|s| threshold.is_some_and(|x| *s <= x)),
            AlertKind::SignalBuy => (tick.recommendation == Some(Recommendation::Buy))
                .then(|| tick.score.map(f64::from).unwrap_or(0.0)),
            AlertKind::PositionStop | AlertKind::PositionTp | AlertKind::NewIpo => None,
        }
    }

    pub(crate) fn describe(&self, value: f64) -> String {
        match (self.kind, self.condition) {
            (AlertKind::PriceAbove, Some(x)) => {
                format!("{} price {value:.2} reached {x:.2} or above", self.ticker)
            }
            (AlertKind::PriceBelow, Some(x)) => {
                format!("{} price {value:.2} fell to {x:.2} or below", self.ticker)
            }
            (AlertKind::ScoreAbove, Some(x)) => {
                format!("{} score {value:.0} reached {x:.0} or above", self.ticker)
            }
            (AlertKind::ScoreBelow, Some(x)) => {
                format!("{} score {value:.0} fell to {x:.0} or below", self.ticker)
            }
            (AlertKind::SignalBuy, _) => format!("{} BUY signal (score {value:.0})", self.ticker),
            _ => format!("{} {}", self.ticker, self.kind.as_str()),
        }
    }
}

/// Latest observation for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketTick {
    pub price: Option<f64>,
    pub score: Option<u8>,
    pub recommendation: Option<Recommendation>,
}

impl MarketTick {
    pub fn price(price: f64) -> Self {
        Self {
            price: Some(price),
            ..Self::default()
        }
    }
}

/// Selection for [`super::AlertManager::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub ticker: Option<String>,
    pub kind: Option<AlertKind>,
    pub active: Option<bool>,
    pub triggered: Option<bool>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.ticker
            .as_deref()
            .map_or(true, |t| alert.ticker.eq_ignore_ascii_case(t))
            && self.kind.map_or(true, |k| alert.kind == k)
            && self.active.map_or(true, |a| alert.active == a)
            && self.triggered.map_or(true, |t| alert.triggered == t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub triggered: usize,
    pub unread: usize,
    pub queued: usize,
    pub history: usize,
}
