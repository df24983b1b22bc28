//! BistLab Live — the tokio side of the service:
//! - Scheduler with named jobs, grace-window coalescing and job status
//! - Fan-out hub indexed by channel and ticker with bounded per-client queues
//! - Per-ticker polling loops with an error budget
//! - Heartbeat for quiet notification clients
//! - Runtime wiring of scans, picks persistence, alerts and fan-out
//!
//! Blocking work (market data fetches, universe scans) runs in
//! `spawn_blocking`; nothing here computes indicators itself.

pub mod config;
pub mod heartbeat;
pub mod hub;
pub mod loops;
pub mod runtime;
pub mod scheduler;

pub use config::LiveConfig;
pub use hub::{
    Channel, ClientAction, Connection, ConnectionId, Envelope, Hub, HubError, HubStats,
    Subscription,
};
pub use loops::{LoopConfig, LoopKey, LoopManager, PollError, PriceUpdate};
pub use runtime::{
    publish_picks, BackupScanJob, Runtime, RuntimeError, ScanJob, BACKUP_SCAN_JOB, DAILY_SCAN_JOB,
};
pub use scheduler::{JobHandler, JobStatus, Schedule, Scheduler, SchedulerError};
