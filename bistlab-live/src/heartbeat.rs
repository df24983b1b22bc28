//! Keep-alive for quiet notification connections.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::Hub;

/// Every `check_every`, send `heartbeat` to notification listeners that
/// have been silent for `idle`.
pub async fn run_heartbeat(
    hub: Arc<Hub>,
    idle: chrono::Duration,
    check_every: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(check_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(idle_secs = idle.num_seconds(), "heartbeat started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let sent = hub.send_heartbeats(idle);
        if sent > 0 {
            debug!(sent, "heartbeats sent");
        }
    }
    info!("heartbeat stopped");
}
