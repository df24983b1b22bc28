//! Wiring of the live service: scheduled scans into the picks service and
//! fan-out, polling loops into alerts, plus the heartbeat.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bistlab_core::data::MarketDataSource;
use bistlab_core::{Classified, Clock, ErrorKind, ExchangeCalendar, Universe};
use bistlab_runner::{
    AlertError, AlertManager, AlertStore, DailyPicks, HybridSignalGenerator, PicksService,
    PicksStore,
};

use crate::config::LiveConfig;
use crate::heartbeat::run_heartbeat;
use crate::hub::{Channel, Hub};
use crate::loops::{LoopConfig, LoopManager};
use crate::scheduler::{JobHandler, Schedule, Scheduler, SchedulerError};

pub const DAILY_SCAN_JOB: &str = "daily_stock_scan";
pub const BACKUP_SCAN_JOB: &str = "cache_refresh_backup";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Alerts(#[from] AlertError),
}

impl Classified for RuntimeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Scheduler(e) => e.kind(),
            Self::Alerts(e) => e.kind(),
        }
    }
}

/// Fan a finished scan out: one `new_signal` per pick, the whole list as a
/// `screener_update`, and a short notification. Returns messages delivered.
pub fn publish_picks(hub: &Hub, picks: &DailyPicks) -> usize {
    let mut reached = 0;
    for signal in &picks.picks {
        reached += hub.broadcast(
            Channel::Signal,
            Some(&signal.ticker),
            "new_signal",
            json!(signal),
        );
    }
    reached += hub.broadcast(Channel::Screener, None, "screener_update", json!(picks));
    reached += hub.broadcast(
        Channel::Notification,
        None,
        "notification",
        json!({
            "message": format!(
                "daily picks for {}: {} of {} tickers",
                picks.scan_date,
                picks.picks.len(),
                picks.scanned
            ),
            "warnings": picks.warnings,
        }),
    );
    reached
}

async fn scan_and_publish(picks: &Arc<PicksService>, hub: &Hub) -> anyhow::Result<()> {
    let service = Arc::clone(picks);
    let daily = tokio::task::spawn_blocking(move || service.daily_picks(true)).await?;
    if daily.scanned > 0 && daily.failures.len() == daily.scanned {
        anyhow::bail!(
            "every ticker failed ({}), nothing published",
            daily.failures.len()
        );
    }
    for w in &daily.warnings {
        warn!(warning = %w, "scan warning");
    }
    let reached = publish_picks(hub, &daily);
    info!(
        scan_date = %daily.scan_date,
        picks = daily.picks.len(),
        reached,
        "daily picks published"
    );
    Ok(())
}

/// The scheduled end-of-day scan. Always rescans.
pub struct ScanJob {
    picks: Arc<PicksService>,
    hub: Arc<Hub>,
}

impl ScanJob {
    pub fn new(picks: Arc<PicksService>, hub: Arc<Hub>) -> Self {
        Self { picks, hub }
    }
}

#[async_trait]
impl JobHandler for ScanJob {
    async fn run(&self) -> anyhow::Result<()> {
        scan_and_publish(&self.picks, &self.hub).await
    }
}

/// Rescans only when the last scan is missing or older than `staleness`.
pub struct BackupScanJob {
    picks: Arc<PicksService>,
    hub: Arc<Hub>,
    staleness: chrono::Duration,
}

impl BackupScanJob {
    pub fn new(picks: Arc<PicksService>, hub: Arc<Hub>, staleness: chrono::Duration) -> Self {
        Self {
            picks,
            hub,
            staleness,
        }
    }
}

#[async_trait]
impl JobHandler for BackupScanJob {
    async fn run(&self) -> anyhow::Result<()> {
        match self.picks.last_scan_age() {
            Some(age) if age <= self.staleness => {
                info!(age_secs = age.num_seconds(), "picks fresh, backup scan skipped");
                Ok(())
            }
            age => {
                info!(age = ?age, "picks stale, backup scan");
                scan_and_publish(&self.picks, &self.hub).await
            }
        }
    }
}

/// Everything the `serve` command runs.
pub struct Runtime {
    config: LiveConfig,
    hub: Arc<Hub>,
    picks: Arc<PicksService>,
    alerts: Arc<AlertManager>,
    scheduler: Arc<Scheduler>,
    loops: Arc<LoopManager>,
}

impl Runtime {
    pub fn new(
        config: LiveConfig,
        source: Arc<dyn MarketDataSource>,
        clock: Arc<dyn Clock>,
        universe: Universe,
    ) -> Result<Self, RuntimeError> {
        let calendar = ExchangeCalendar::bist();
        let generator = HybridSignalGenerator::new(
            source,
            Arc::clone(&clock),
            calendar.clone(),
            universe,
            config.scan.clone(),
        );
        let picks = Arc::new(PicksService::new(
            generator,
            Some(PicksStore::new(&config.picks_path)),
        ));
        picks.warm_from_store();

        let mut alerts = AlertManager::new(Arc::clone(&clock));
        if let Some(path) = &config.alerts_path {
            alerts = alerts.with_store(AlertStore::new(path))?;
        }
        let alerts = Arc::new(alerts);

        let hub = Arc::new(Hub::new(Arc::clone(&clock), config.outbound_queue));

        let scheduler = Arc::new(Scheduler::new(clock, calendar, config.grace()));
        scheduler.add(
            DAILY_SCAN_JOB,
            Schedule::DailyAt {
                time: config.scan_time,
                weekdays_only: true,
            },
            Arc::new(ScanJob::new(Arc::clone(&picks), Arc::clone(&hub))),
        )?;
        scheduler.add(
            BACKUP_SCAN_JOB,
            Schedule::Every(config.backup_interval()),
            Arc::new(BackupScanJob::new(
                Arc::clone(&picks),
                Arc::clone(&hub),
                config.backup_staleness(),
            )),
        )?;
        // Boot-time catch-up; a fresh picks file makes it a no-op.
        scheduler.defer_once(BACKUP_SCAN_JOB, config.startup_delay())?;

        let loops = Arc::new(LoopManager::new(
            Arc::clone(&hub),
            Arc::clone(&picks),
            Arc::clone(&alerts),
            LoopConfig::from_live(&config),
        ));

        Ok(Self {
            config,
            hub,
            picks,
            alerts,
            scheduler,
            loops,
        })
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn picks(&self) -> &Arc<PicksService> {
        &self.picks
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn loops(&self) -> &Arc<LoopManager> {
        &self.loops
    }

    /// Run scheduler, loops and heartbeat until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(
            scan_time = %self.config.scan_time,
            picks_path = %self.config.picks_path.display(),
            "live runtime starting"
        );
        let scheduler = tokio::spawn(
            Arc::clone(&self.scheduler).run(self.config.scheduler_tick(), token.child_token()),
        );
        let loops = tokio::spawn(Arc::clone(&self.loops).run(token.child_token()));
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&self.hub),
            self.config.heartbeat_idle(),
            std::time::Duration::from_secs(1),
            token.child_token(),
        ));

        token.cancelled().await;
        for (name, task) in [("scheduler", scheduler), ("loops", loops), ("heartbeat", heartbeat)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "task ended abnormally");
            }
        }
        info!("live runtime stopped");
    }
}
