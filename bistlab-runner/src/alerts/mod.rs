//! Rule-based alerts evaluated against market snapshots.
//!
//! All state sits behind one mutex. An alert fires at most once; `reset`
//! re-arms it. Fired alerts go to a FIFO queue (consumed by
//! [`AlertManager::drain_triggered`]) and to a history, both bounded by the
//! same cap.

pub mod model;
pub mod store;

pub use model::{Alert, AlertFeed, AlertFilter, AlertKind, AlertStats, MarketTick, Priority};
pub use store::AlertStore;

use chrono::Duration;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use bistlab_core::data::normalize_ticker;
use bistlab_core::{Classified, Clock, ErrorKind};

use crate::picks_store::StoreError;

pub const DEFAULT_HISTORY_CAP: usize = 100;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(String),

    #[error("{kind}: {reason}")]
    InvalidCondition { kind: &'static str, reason: String },

    #[error("ticker must not be empty")]
    EmptyTicker,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classified for AlertError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::InvalidCondition { .. } | Self::EmptyTicker => {
                ErrorKind::InvalidInput
            }
            Self::Store(e) => e.kind(),
        }
    }
}

#[derive(Default)]
struct State {
    /// Creation order.
    alerts: Vec<Alert>,
    triggered: VecDeque<Alert>,
    history: VecDeque<Alert>,
}

impl State {
    fn find_mut(&mut self, id: &str) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.id == id)
    }

    fn record(&mut self, alert: &Alert, cap: usize) {
        self.triggered.push_back(alert.clone());
        self.history.push_back(alert.clone());
        for queue in [&mut self.triggered, &mut self.history] {
            while queue.len() > cap {
                queue.pop_front();
            }
        }
    }
}

pub struct AlertManager {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    store: Option<AlertStore>,
    history_cap: usize,
}

impl AlertManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            store: None,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Load alerts from `store` and persist every later mutation to it.
    pub fn with_store(mut self, store: AlertStore) -> Result<Self, AlertError> {
        let alerts = store.load()?;
        info!(path = %store.path().display(), alerts = alerts.len(), "alerts loaded");
        self.state.get_mut().alerts = alerts;
        self.store = Some(store);
        Ok(self)
    }

    fn persist(&self, state: &State) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&state.alerts) {
                warn!(error = %e, kind = %e.kind(), "alerts not persisted");
            }
        }
    }

    pub fn create(
        &self,
        kind: AlertKind,
        ticker: &str,
        condition: Option<f64>,
        priority: Priority,
        message: Option<String>,
    ) -> Result<String, AlertError> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(AlertError::EmptyTicker);
        }
        validate_condition(kind, condition)?;

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            kind,
            message: message
                .unwrap_or_else(|| format!("{ticker} {}", kind.as_str())),
            ticker,
            condition,
            priority,
            active: true,
            triggered: false,
            read: false,
            created_at: self.clock.now(),
            triggered_at: None,
            trigger_value: None,
        };
        let id = alert.id.clone();
        let mut state = self.state.lock();
        state.alerts.push(alert);
        self.persist(&state);
        Ok(id)
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.alerts.len();
        state.alerts.retain(|a| a.id != id);
        let removed = state.alerts.len() != before;
        if removed {
            self.persist(&state);
        }
        removed
    }

    pub fn set_active(&self, id: &str, active: bool) -> bool {
        self.update(id, |a| a.active = active)
    }

    /// Re-arm a fired alert.
    pub fn reset(&self, id: &str) -> bool {
        self.update(id, |a| {
            a.triggered = false;
            a.triggered_at = None;
            a.trigger_value = None;
            a.read = false;
        })
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let mut found = false;
        if let Some(a) = state.find_mut(id) {
            a.read = true;
            found = true;
        }
        for a in state.history.iter_mut().filter(|a| a.id == id) {
            a.read = true;
            found = true;
        }
        if found {
            self.persist(&state);
        }
        found
    }

    /// Number of alerts that changed.
    pub fn mark_all_read(&self) -> usize {
        let mut state = self.state.lock();
        let mut changed = 0;
        for a in state.alerts.iter_mut().filter(|a| a.triggered && !a.read) {
            a.read = true;
            changed += 1;
        }
        for a in state.history.iter_mut() {
            a.read = true;
        }
        if changed > 0 {
            self.persist(&state);
        }
        changed
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Alert)) -> bool {
        let mut state = self.state.lock();
        let Some(alert) = state.find_mut(id) else {
            return false;
        };
        f(alert);
        self.persist(&state);
        true
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        self.state.lock().alerts.iter().find(|a| a.id == id).cloned()
    }

    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.state
            .lock()
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    /// Tickers with at least one armed alert fed by `feed`.
    pub fn watched_tickers(&self, feed: AlertFeed) -> Vec<String> {
        let mut tickers: Vec<String> = self
            .state
            .lock()
            .alerts
            .iter()
            .filter(|a| a.is_armed() && a.kind.feed() == Some(feed))
            .map(|a| a.ticker.clone())
            .collect();
        tickers.sort();
        tickers.dedup();
        tickers
    }

    /// Fire every armed alert whose rule holds for its ticker in `snapshot`.
    /// Returns the newly fired alerts in creation order.
    pub fn evaluate(&self, snapshot: &HashMap<String, MarketTick>) -> Vec<Alert> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut fired = Vec::new();
        for alert in state.alerts.iter_mut().filter(|a| a.is_armed()) {
            let Some(tick) = snapshot.get(&alert.ticker) else {
                continue;
            };
            if let Some(value) = alert.check(tick) {
                alert.triggered = true;
                alert.triggered_at = Some(now);
                alert.trigger_value = Some(value);
                alert.message = alert.describe(value);
                fired.push(alert.clone());
            }
        }
        for alert in &fired {
            info!(id = %alert.id, ticker = %alert.ticker, kind = alert.kind.as_str(), "alert triggered");
            state.record(alert, self.history_cap);
        }
        if !fired.is_empty() {
            self.persist(&state);
        }
        fired
    }

    /// Store an alert raised elsewhere (position exits, IPOs). It is born
    /// triggered and goes straight to the queue and history.
    pub fn record_external(
        &self,
        kind: AlertKind,
        ticker: &str,
        message: impl Into<String>,
        value: Option<f64>,
        priority: Priority,
    ) -> Alert {
        let now = self.clock.now();
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            kind,
            ticker: normalize_ticker(ticker),
            condition: None,
            priority,
            message: message.into(),
            active: true,
            triggered: true,
            read: false,
            created_at: now,
            triggered_at: Some(now),
            trigger_value: value,
        };
        let mut state = self.state.lock();
        state.alerts.push(alert.clone());
        state.record(&alert, self.history_cap);
        self.persist(&state);
        alert
    }

    /// Consume the triggered queue.
    pub fn drain_triggered(&self) -> Vec<Alert> {
        self.state.lock().triggered.drain(..).collect()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Drop history entries fired more than `older_than_days` ago, or all of
    /// them when `None`. Returns how many were removed.
    pub fn clear_history(&self, older_than_days: Option<i64>) -> usize {
        let mut state = self.state.lock();
        let before = state.history.len();
        match older_than_days {
            None => state.history.clear(),
            Some(days) => {
                let cutoff = self.clock.now() - Duration::days(days);
                state
                    .history
                    .retain(|a| a.triggered_at.map_or(true, |t| t >= cutoff));
            }
        }
        before - state.history.len()
    }

    pub fn stats(&self) -> AlertStats {
        let state = self.state.lock();
        AlertStats {
            total: state.alerts.len(),
            active: state.alerts.iter().filter(|a| a.active).count(),
            triggered: state.alerts.iter().filter(|a| a.triggered).count(),
            unread: state
                .alerts
                .iter()
                .filter(|a| a.triggered && !a.read)
                .count(),
            queued: state.triggered.len(),
            history: state.history.len(),
        }
    }
}

fn validate_condition(kind: AlertKind, condition: Option<f64>) -> Result<(), AlertError> {
    if !kind.needs_condition() {
        return Ok(());
    }
    let invalid = |reason: &str| AlertError::InvalidCondition {
        kind: kind.as_str(),
        reason: reason.to_string(),
    };
    let x = condition.ok_or_else(|| invalid("threshold required"))?;
    if !x.is_finite() {
        return Err(invalid("threshold must be finite"));
    }
    match kind {
        AlertKind::PriceAbove | AlertKind::PriceBelow if x <= 0.0 => {
            Err(invalid("price threshold must be positive"))
        }
        AlertKind::ScoreAbove | AlertKind::ScoreBelow if !(0.0..=100.0).contains(&x) => {
            Err(invalid("score threshold must be within 0..=100"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistlab_core::{ManualClock, Recommendation};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap(),
        ))
    }

    fn tick(ticker: &str, t: MarketTick) -> HashMap<String, MarketTick> {
        HashMap::from([(ticker.to_string(), t)])
    }

    #[test]
    fn price_above_fires_once() {
        let mgr = AlertManager::new(clock());
        let id = mgr
            .create(AlertKind::PriceAbove, "THYAO", Some(50.0), Priority::High, None)
            .unwrap();
        let fired: Vec<usize> = [49.0, 50.1, 51.0, 52.0]
            .iter()
            .map(|p| mgr.evaluate(&tick("THYAO", MarketTick::price(*p))).len())
            .collect();
        assert_eq!(fired, vec![0, 1, 0, 0]);
        let alert = mgr.get(&id).unwrap();
        assert!(alert.triggered);
        assert_eq!(alert.trigger_value, Some(50.1));
        assert_eq!(mgr.drain_triggered().len(), 1);
        assert!(mgr.drain_triggered().is_empty());
    }

    #[test]
    fn reset_rearms() {
        let mgr = AlertManager::new(clock());
        let id = mgr
            .create(AlertKind::PriceBelow, "ASELS", Some(40.0), Priority::Medium, None)
            .unwrap();
        assert_eq!(mgr.evaluate(&tick("ASELS", MarketTick::price(39.0))).len(), 1);
        assert!(mgr.reset(&id));
        assert_eq!(mgr.evaluate(&tick("ASELS", MarketTick::price(38.0))).len(), 1);
        assert_eq!(mgr.history().len(), 2);
    }

    #[test]
    fn inactive_alerts_do_not_fire() {
        let mgr = AlertManager::new(clock());
        let id = mgr
            .create(AlertKind::ScoreAbove, "BIMAS", Some(70.0), Priority::Low, None)
            .unwrap();
        assert!(mgr.set_active(&id, false));
        let t = MarketTick {
            price: Some(500.0),
            score: Some(85),
            recommendation: Some(Recommendation::Buy),
        };
        assert!(mgr.evaluate(&tick("BIMAS", t)).is_empty());
        assert!(mgr.set_active(&id, true));
        assert_eq!(mgr.evaluate(&tick("BIMAS", t)).len(), 1);
    }

    #[test]
    fn signal_buy_and_score_below() {
        let mgr = AlertManager::new(clock());
        mgr.create(AlertKind::SignalBuy, "KCHOL", None, Priority::High, None)
            .unwrap();
        mgr.create(AlertKind::ScoreBelow, "KCHOL", Some(40.0), Priority::Low, None)
            .unwrap();
        let wait = MarketTick {
            price: Some(150.0),
            score: Some(65),
            recommendation: Some(Recommendation::Wait),
        };
        assert!(mgr.evaluate(&tick("KCHOL", wait)).is_empty());
        let buy = MarketTick {
            recommendation: Some(Recommendation::Buy),
            ..wait
        };
        let fired = mgr.evaluate(&tick("KCHOL", buy));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::SignalBuy);
    }

    #[test]
    fn evaluate_returns_creation_order() {
        let mgr = AlertManager::new(clock());
        let a = mgr
            .create(AlertKind::PriceAbove, "EREGL", Some(10.0), Priority::Low, None)
            .unwrap();
        let b = mgr
            .create(AlertKind::PriceAbove, "EREGL", Some(20.0), Priority::Low, None)
            .unwrap();
        let ids: Vec<String> = mgr
            .evaluate(&tick("EREGL", MarketTick::price(25.0)))
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn invalid_conditions_rejected() {
        let mgr = AlertManager::new(clock());
        let err = mgr
            .create(AlertKind::PriceAbove, "THYAO", None, Priority::Low, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(mgr
            .create(AlertKind::ScoreAbove, "THYAO", Some(150.0), Priority::Low, None)
            .is_err());
        assert!(mgr
            .create(AlertKind::PriceBelow, "", Some(1.0), Priority::Low, None)
            .is_err());
    }

    #[test]
    fn history_is_bounded() {
        let mgr = AlertManager::new(clock()).with_history_cap(3);
        for i in 0..5 {
            mgr.record_external(
                AlertKind::NewIpo,
                "IPO",
                format!("offering {i}"),
                None,
                Priority::Medium,
            );
        }
        let history = mgr.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "offering 2");
        assert_eq!(mgr.stats().queued, 3);
        let queued = mgr.drain_triggered();
        assert_eq!(queued[0].message, "offering 2");
        assert_eq!(queued[2].message, "offering 4");
    }

    #[test]
    fn watched_tickers_split_by_feed() {
        let mgr = AlertManager::new(clock());
        mgr.create(AlertKind::PriceAbove, "THYAO", Some(300.0), Priority::Low, None)
            .unwrap();
        mgr.create(AlertKind::ScoreAbove, "GARAN", Some(70.0), Priority::Low, None)
            .unwrap();
        mgr.create(AlertKind::SignalBuy, "AKBNK", None, Priority::Low, None)
            .unwrap();
        mgr.record_external(AlertKind::NewIpo, "NEWCO", "listed", None, Priority::Low);

        assert_eq!(mgr.watched_tickers(AlertFeed::Price), vec!["THYAO"]);
        assert_eq!(mgr.watched_tickers(AlertFeed::Score), vec!["AKBNK", "GARAN"]);
    }

    #[test]
    fn external_alerts_are_never_evaluated() {
        let mgr = AlertManager::new(clock());
        let alert = mgr.record_external(
            AlertKind::PositionStop,
            "GARAN",
            "GARAN stopped at 95.00",
            Some(95.0),
            Priority::Critical,
        );
        assert!(alert.triggered);
        assert!(mgr
            .evaluate(&tick("GARAN", MarketTick::price(10.0)))
            .is_empty());
        assert_eq!(mgr.stats().unread, 1);
        assert_eq!(mgr.mark_all_read(), 1);
        assert_eq!(mgr.stats().unread, 0);
    }

    #[test]
    fn clear_history_by_age() {
        let clock = clock();
        let mgr = AlertManager::new(clock.clone());
        mgr.record_external(AlertKind::NewIpo, "OLD", "old", None, Priority::Low);
        clock.advance(Duration::days(10));
        mgr.record_external(AlertKind::NewIpo, "NEW", "new", None, Priority::Low);
        assert_eq!(mgr.clear_history(Some(7)), 1);
        assert_eq!(mgr.history()[0].ticker, "NEW");
        assert_eq!(mgr.clear_history(None), 1);
    }

    #[test]
    fn store_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("alerts.json");
        let mgr = AlertManager::new(clock())
            .with_store(AlertStore::new(&path))
            .unwrap();
        let id = mgr
            .create(AlertKind::PriceAbove, "THYAO", Some(300.0), Priority::High, None)
            .unwrap();

        let reloaded = AlertManager::new(clock())
            .with_store(AlertStore::new(&path))
            .unwrap();
        let alert = reloaded.get(&id).unwrap();
        assert_eq!(alert.condition, Some(300.0));
        assert!(reloaded.delete(&id));
        assert!(AlertStore::new(&path).load().unwrap().is_empty());
    }
}
