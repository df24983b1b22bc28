//! Live service settings (TOML): poll cadences, fan-out limits, job times and
//! file locations. The daily scan itself is configured by the nested `[scan]`
//! table.

use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use bistlab_runner::{ConfigError, ScanConfig};

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// `HH:MM` wall-clock times in the exchange time zone.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub price_poll_secs: u64,
    pub signal_poll_secs: u64,
    /// Consecutive failures before a polling loop is torn down.
    pub error_budget: u32,
    pub heartbeat_secs: u64,
    /// Per-connection outbound queue; a client lagging past it is dropped.
    pub outbound_queue: usize,
    pub picks_path: PathBuf,
    pub alerts_path: Option<PathBuf>,
    /// Universe TOML; the built-in BIST-30 universe when absent.
    pub universe: Option<PathBuf>,
    #[serde(with = "hhmm")]
    pub scan_time: NaiveTime,
    pub backup_interval_secs: u64,
    /// The backup job rescans only when the last scan is older than this.
    pub backup_staleness_secs: u64,
    pub startup_delay_secs: u64,
    /// Missed fires younger than this are coalesced into one run.
    pub grace_secs: u64,
    pub scheduler_tick_millis: u64,
    pub scan: ScanConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            price_poll_secs: 2,
            signal_poll_secs: 5,
            error_budget: 5,
            heartbeat_secs: 30,
            outbound_queue: 256,
            picks_path: PathBuf::from("data/daily_picks.json"),
            alerts_path: Some(PathBuf::from("data/alerts.json")),
            universe: None,
            scan_time: NaiveTime::from_hms_opt(18, 30, 0).unwrap_or_default(),
            backup_interval_secs: 4 * 3600,
            backup_staleness_secs: 3 * 3600,
            startup_delay_secs: 5,
            grace_secs: 3600,
            scheduler_tick_millis: 1000,
            scan: ScanConfig::default(),
        }
    }
}

impl LiveConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.price_poll_secs == 0 || self.signal_poll_secs == 0 {
            return Err(invalid("price_poll_secs", "poll cadences must be positive"));
        }
        if self.error_budget == 0 {
            return Err(invalid("error_budget", "must be at least 1"));
        }
        if self.heartbeat_secs == 0 {
            return Err(invalid("heartbeat_secs", "must be positive"));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("outbound_queue", "must be at least 1"));
        }
        if self.backup_interval_secs == 0 {
            return Err(invalid("backup_interval_secs", "must be positive"));
        }
        if self.scheduler_tick_millis == 0 {
            return Err(invalid("scheduler_tick_millis", "must be positive"));
        }
        self.scan.validate()
    }

    pub fn price_every(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.price_poll_secs)
    }

    pub fn signal_every(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.signal_poll_secs)
    }

    pub fn heartbeat_idle(&self) -> Duration {
        Duration::seconds(self.heartbeat_secs as i64)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::seconds(self.backup_interval_secs as i64)
    }

    pub fn backup_staleness(&self) -> Duration {
        Duration::seconds(self.backup_staleness_secs as i64)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::seconds(self.startup_delay_secs as i64)
    }

    pub fn grace(&self) -> Duration {
        Duration::seconds(self.grace_secs as i64)
    }

    pub fn scheduler_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler_tick_millis)
    }
}
