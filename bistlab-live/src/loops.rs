//! Per-ticker polling loops feeding the hub.
//!
//! One task per `(ticker, channel)` no matter how many clients listen. A loop
//! polls on its own cadence, exits at the first tick that finds nobody
//! listening, and is torn down after `error_budget` consecutive failures,
//! taking its subscribers with it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bistlab_core::data::DataError;
use bistlab_core::{Classified, DataSource, ErrorKind, IndicatorSnapshot, Interval, Period, Series};
use bistlab_runner::{AlertFeed, AlertManager, MarketTick, PicksService, ScanError};

use crate::config::LiveConfig;
use crate::hub::{Channel, Hub};

/// Loop channel serving each alert feed.
const FEEDS: [(AlertFeed, Channel); 2] = [
    (AlertFeed::Price, Channel::Price),
    (AlertFeed::Score, Channel::Signal),
];

// ─── Updates ────────────────────────────────────────────────────────

/// Minimal per-tick price message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Against the previous bar's close; zero for a single-bar series.
    pub change: f64,
    pub change_pct: f64,
    pub indicators: Option<IndicatorSnapshot>,
    pub data_source: DataSource,
}

impl PriceUpdate {
    pub fn from_series(series: &Series) -> Option<Self> {
        let bars = series.bars();
        let last = series.last()?;
        let prev_close = bars
            .len()
            .checked_sub(2)
            .map_or(last.close, |i| bars[i].close);
        let change = last.close - prev_close;
        let change_pct = if prev_close > 0.0 {
            change / prev_close * 100.0
        } else {
            0.0
        };
        Some(Self {
            ticker: series.ticker().to_string(),
            timestamp: last.timestamp,
            open: last.open,
            high: last.high,
            low: last.low,
            close: last.close,
            volume: last.volume,
            change,
            change_pct,
            indicators: IndicatorSnapshot::from_bars(bars),
            data_source: series.source(),
        })
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("{ticker}: empty series")]
    Empty { ticker: String },

    #[error("poll task failed: {0}")]
    Join(String),
}

impl Classified for PollError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Data(e) => e.kind(),
            Self::Scan(e) => e.kind(),
            Self::Empty { .. } => ErrorKind::DataUnavailable,
            Self::Join(_) => ErrorKind::Internal,
        }
    }
}

// ─── Loop manager ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopKey {
    pub ticker: String,
    pub channel: Channel,
}

impl LoopKey {
    pub fn new(ticker: impl Into<String>, channel: Channel) -> Self {
        Self {
            ticker: ticker.into(),
            channel,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub price_every: Duration,
    pub signal_every: Duration,
    pub error_budget: u32,
    pub interval: Interval,
    pub period: Period,
    /// Fallback cadence for picking up alert tickers and restarting loops.
    pub reconcile_every: Duration,
}

impl LoopConfig {
    pub fn from_live(config: &LiveConfig) -> Self {
        Self {
            price_every: config.price_every(),
            signal_every: config.signal_every(),
            error_budget: config.error_budget,
            interval: config.scan.interval,
            period: config.scan.period,
            reconcile_every: Duration::from_secs(60),
        }
    }
}

struct LoopHandle {
    generation: u64,
    token: CancellationToken,
}

pub struct LoopManager {
    hub: Arc<Hub>,
    picks: Arc<PicksService>,
    alerts: Arc<AlertManager>,
    config: LoopConfig,
    active: Mutex<HashMap<LoopKey, LoopHandle>>,
    generations: AtomicU64,
}

impl LoopManager {
    pub fn new(
        hub: Arc<Hub>,
        picks: Arc<PicksService>,
        alerts: Arc<AlertManager>,
        config: LoopConfig,
    ) -> Self {
        Self {
            hub,
            picks,
            alerts,
            config,
            active: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn active_loops(&self) -> Vec<LoopKey> {
        let mut keys: Vec<LoopKey> = self.active.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Armed price alerts keep a PRICE loop running, armed score and
    /// signal alerts a SIGNAL loop.
    fn wanted(&self) -> BTreeSet<LoopKey> {
        let mut keys: BTreeSet<LoopKey> = BTreeSet::new();
        for channel in [Channel::Price, Channel::Signal] {
            keys.extend(
                self.hub
                    .watched_tickers(channel)
                    .into_iter()
                    .map(|t| LoopKey::new(t, channel)),
            );
        }
        for (feed, channel) in FEEDS {
            keys.extend(
                self.alerts
                    .watched_tickers(feed)
                    .into_iter()
                    .map(|t| LoopKey::new(t, channel)),
            );
        }
        keys
    }

    fn is_wanted(&self, key: &LoopKey) -> bool {
        self.hub.has_subscribers(key.channel, &key.ticker)
            || FEEDS.iter().any(|(feed, channel)| {
                *channel == key.channel && self.alerts.watched_tickers(*feed).contains(&key.ticker)
            })
    }

    /// Start a loop for every wanted key that has none. Returns how many
    /// were started.
    pub fn reconcile(self: &Arc<Self>, parent: &CancellationToken) -> usize {
        let wanted = self.wanted();
        let mut active = self.active.lock();
        let mut started = 0;
        for key in wanted {
            if active.contains_key(&key) {
                continue;
            }
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);
            let token = parent.child_token();
            active.insert(
                key.clone(),
                LoopHandle {
                    generation,
                    token: token.clone(),
                },
            );
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_loop(key, generation, token).await });
            started += 1;
        }
        started
    }

    fn forget(&self, key: &LoopKey, generation: u64) {
        let mut active = self.active.lock();
        if active.get(key).is_some_and(|h| h.generation == generation) {
            active.remove(key);
        }
    }

    pub fn stop_all(&self) {
        for (_, handle) in self.active.lock().drain() {
            handle.token.cancel();
        }
    }

    async fn run_loop(self: Arc<Self>, key: LoopKey, generation: u64, token: CancellationToken) {
        let every = match key.channel {
            Channel::Signal => self.config.signal_every,
            _ => self.config.price_every,
        };
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;
        info!(ticker = %key.ticker, channel = ?key.channel, every_ms = every.as_millis() as u64, "poll loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.is_wanted(&key) {
                info!(ticker = %key.ticker, channel = ?key.channel, "no subscribers left, poll loop stopped");
                break;
            }
            match self.poll(&key).await {
                Ok(reached) => {
                    failures = 0;
                    debug!(ticker = %key.ticker, channel = ?key.channel, reached, "polled");
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        ticker = %key.ticker,
                        channel = ?key.channel,
                        failures,
                        kind = %e.kind(),
                        error = %e,
                        "poll failed"
                    );
                    if failures >= self.config.error_budget {
                        let message = format!(
                            "{:?} feed for {} stopped after {failures} consecutive errors: {e}",
                            key.channel, key.ticker
                        );
                        error!(ticker = %key.ticker, channel = ?key.channel, "{message}");
                        self.hub
                            .disconnect_subscribers(key.channel, &key.ticker, &message);
                        break;
                    }
                }
            }
        }
        self.forget(&key, generation);
    }

    async fn poll(&self, key: &LoopKey) -> Result<usize, PollError> {
        match key.channel {
            Channel::Signal => self.poll_signal(&key.ticker).await,
            _ => self.poll_price(&key.ticker).await,
        }
    }

    async fn poll_price(&self, ticker: &str) -> Result<usize, PollError> {
        let picks = Arc::clone(&self.picks);
        let (interval, period) = (self.config.interval, self.config.period);
        let t = ticker.to_string();
        let series = tokio::task::spawn_blocking(move || {
            picks.generator().source().fetch_bars(&t, interval, period)
        })
        .await
        .map_err(|e| PollError::Join(e.to_string()))??;

        let update = PriceUpdate::from_series(&series).ok_or_else(|| PollError::Empty {
            ticker: ticker.to_string(),
        })?;
        let close = update.close;
        let reached =
            self.hub
                .broadcast(Channel::Price, Some(ticker), "price_update", json!(update));
        self.publish_alerts(ticker, MarketTick::price(close));
        Ok(reached)
    }

    async fn poll_signal(&self, ticker: &str) -> Result<usize, PollError> {
        let picks = Arc::clone(&self.picks);
        let (interval, period) = (self.config.interval, self.config.period);
        let t = ticker.to_string();
        let signal = tokio::task::spawn_blocking(move || {
            picks.generator().per_ticker_signal(&t, interval, period)
        })
        .await
        .map_err(|e| PollError::Join(e.to_string()))??;

        let tick = MarketTick {
            price: Some(signal.levels.entry),
            score: Some(signal.score.total),
            recommendation: Some(signal.score.recommendation),
        };
        let reached = self
            .hub
            .broadcast(Channel::Signal, Some(ticker), "new_signal", json!(signal));
        self.publish_alerts(ticker, tick);
        Ok(reached)
    }

    /// Evaluate `tick`, then deliver everything queued, including alerts
    /// recorded externally since the last poll.
    fn publish_alerts(&self, ticker: &str, tick: MarketTick) {
        let snapshot = HashMap::from([(ticker.to_string(), tick)]);
        let fired = self.alerts.evaluate(&snapshot).len();
        for alert in self.alerts.drain_triggered() {
            info!(ticker = %alert.ticker, alert = %alert.id, kind = alert.kind.as_str(), "alert delivered");
            self.hub.broadcast(
                Channel::Alert,
                Some(alert.ticker.as_str()),
                "alert_triggered",
                json!(alert),
            );
        }
        if fired > 0 {
            debug!(ticker, fired, "alerts fired");
        }
    }

    /// Reconcile on every new subscription and on a slow timer until
    /// cancelled, then stop every loop.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!("loop manager started");
        loop {
            let started = self.reconcile(&token);
            if started > 0 {
                debug!(started, "poll loops started");
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.hub.demand_changed() => {}
                _ = tokio::time::sleep(self.config.reconcile_every) => {}
            }
        }
        self.stop_all();
        info!("loop manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistlab_core::data::StaticSource;
    use bistlab_core::{Bar, ExchangeCalendar, ManualClock, Universe};
    use bistlab_runner::{AlertKind, HybridSignalGenerator, Priority, ScanConfig};
    use chrono::TimeZone;

    fn bars(closes: &[f64]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 7, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: t0 + chrono::Duration::days(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1_000,
            })
            .collect()
    }

    #[test]
    fn price_update_change_is_against_previous_close() {
        let s = Series::new("AKBNK", Interval::OneDay, DataSource::Static, bars(&[50.0, 55.0]))
            .unwrap();
        let u = PriceUpdate::from_series(&s).unwrap();
        assert_eq!(u.close, 55.0);
        assert_eq!(u.change, 5.0);
        assert!((u.change_pct - 10.0).abs() < 1e-12);

        let single = Series::new("AKBNK", Interval::OneDay, DataSource::Static, bars(&[50.0]))
            .unwrap();
        assert_eq!(PriceUpdate::from_series(&single).unwrap().change, 0.0);

        let empty = Series::new("AKBNK", Interval::OneDay, DataSource::Static, vec![]).unwrap();
        assert!(PriceUpdate::from_series(&empty).is_none());
    }

    #[test]
    fn wanted_keys_merge_hub_and_alert_tickers() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
        ));
        let hub = Arc::new(Hub::new(clock.clone(), 16));
        let generator = HybridSignalGenerator::new(
            Arc::new(StaticSource::new()),
            clock.clone(),
            ExchangeCalendar::bist(),
            Universe::bist30(),
            ScanConfig::default(),
        );
        let alerts = Arc::new(AlertManager::new(clock.clone()));
        let manager = LoopManager::new(
            Arc::clone(&hub),
            Arc::new(PicksService::new(generator, None)),
            Arc::clone(&alerts),
            LoopConfig::from_live(&LiveConfig::default()),
        );

        let _c = hub.connect([Channel::Price, Channel::Signal], ["AKBNK"], None);
        alerts
            .create(AlertKind::PriceBelow, "THYAO", Some(250.0), Priority::Low, None)
            .unwrap();
        alerts
            .create(AlertKind::SignalBuy, "EREGL", None, Priority::Low, None)
            .unwrap();
        let wanted: Vec<LoopKey> = manager.wanted().into_iter().collect();
        assert_eq!(
            wanted,
            vec![
                LoopKey::new("AKBNK", Channel::Price),
                LoopKey::new("AKBNK", Channel::Signal),
                LoopKey::new("EREGL", Channel::Signal),
                LoopKey::new("THYAO", Channel::Price),
            ]
        );
        assert!(manager.is_wanted(&LoopKey::new("EREGL", Channel::Signal)));
        assert!(!manager.is_wanted(&LoopKey::new("EREGL", Channel::Price)));
        assert!(!manager.is_wanted(&LoopKey::new("THYAO", Channel::Signal)));
    }
}
