//! Once-per-day cache in front of the generator.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use bistlab_core::Classified;

use crate::generator::{DailyPicks, HybridSignalGenerator};
use crate::picks_store::PicksStore;

struct Cached {
    date: NaiveDate,
    picks: Arc<DailyPicks>,
}

/// Serves the day's picks, scanning at most once per exchange date unless
/// forced. Scans are serialized; concurrent callers wait for the running one
/// and then read its result.
pub struct PicksService {
    generator: HybridSignalGenerator,
    store: Option<PicksStore>,
    cached: Mutex<Option<Cached>>,
    scan_lock: Mutex<()>,
    last_scan: Mutex<Option<DateTime<Utc>>>,
}

impl PicksService {
    pub fn new(generator: HybridSignalGenerator, store: Option<PicksStore>) -> Self {
        Self {
            generator,
            store,
            cached: Mutex::new(None),
            scan_lock: Mutex::new(()),
            last_scan: Mutex::new(None),
        }
    }

    /// Seed the in-memory cache and last-scan time from the picks file.
    pub fn warm_from_store(&self) {
        let Some(store) = &self.store else { return };
        match store.load() {
            Ok(Some(file)) => {
                *self.last_scan.lock() = Some(file.latest.scan_time);
                *self.cached.lock() = Some(Cached {
                    date: file.latest.scan_date,
                    picks: Arc::new(file.latest),
                });
                info!(path = %store.path().display(), "picks cache warmed from file");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read picks file"),
        }
    }

    pub fn generator(&self) -> &HybridSignalGenerator {
        &self.generator
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        *self.last_scan.lock()
    }

    /// Time since the last completed scan, if any.
    pub fn last_scan_age(&self) -> Option<chrono::Duration> {
        self.last_scan().map(|at| self.generator.clock().now() - at)
    }

    fn today(&self) -> NaiveDate {
        let now = self.generator.clock().now();
        self.generator.calendar().local_date(now)
    }

    fn cached_for(&self, date: NaiveDate) -> Option<Arc<DailyPicks>> {
        self.cached
            .lock()
            .as_ref()
            .filter(|c| c.date == date)
            .map(|c| Arc::clone(&c.picks))
    }

    /// Today's picks with the configured `max_picks`/`min_score`.
    pub fn daily_picks(&self, force_refresh: bool) -> Arc<DailyPicks> {
        if !force_refresh {
            if let Some(hit) = self.cached_for(self.today()) {
                return hit;
            }
        }

        let _guard = self.scan_lock.lock();
        // Another caller may have finished a scan while we waited.
        if !force_refresh {
            if let Some(hit) = self.cached_for(self.today()) {
                return hit;
            }
        }

        let config = self.generator.config();
        let picks = Arc::new(self.generator.daily_picks(config.max_picks, config.min_score));
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&picks) {
                warn!(error = %e, kind = %e.kind(), "picks not persisted");
            }
        }
        *self.last_scan.lock() = Some(picks.scan_time);
        *self.cached.lock() = Some(Cached {
            date: picks.scan_date,
            picks: Arc::clone(&picks),
        });
        picks
    }
}
