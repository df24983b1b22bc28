//! Provider back-off after repeated failures or a ban.
//!
//! `failure_threshold` failures in a row (or one HTTP 403) open the breaker;
//! every request is refused until the cooldown has passed.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Tally {
    streak: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    tally: Mutex<Tally>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            tally: Mutex::new(Tally::default()),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Five-minute cooldown after three consecutive failures.
    pub fn default_provider() -> Self {
        Self::new(Duration::from_secs(300), 3)
    }

    /// `true` when a request may go out. An expired cooldown closes the breaker.
    pub fn is_allowed(&self) -> bool {
        let mut tally = self.tally.lock();
        match tally.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *tally = Tally::default();
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        self.tally.lock().streak = 0;
    }

    pub fn record_failure(&self) {
        let mut tally = self.tally.lock();
        tally.streak = tally.streak.saturating_add(1);
        if tally.streak >= self.failure_threshold {
            tally.open_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Open right away, regardless of the streak.
    pub fn trip(&self) {
        self.tally.lock().open_until = Some(Instant::now() + self.cooldown);
    }

    pub fn remaining_cooldown(&self) -> Duration {
        self.tally
            .lock()
            .open_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}
