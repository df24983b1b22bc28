//! Named-job scheduler on the exchange clock.
//!
//! Jobs fire on a [`Schedule`]. A tick asks [`Scheduler::due`] which jobs to
//! start; missed fires inside the grace window collapse into one run, older
//! ones are skipped. A job never overlaps itself, and a failing run is logged
//! and counted without affecting later fires.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bistlab_core::{Classified, Clock, ErrorKind, ExchangeCalendar};

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already registered")]
    DuplicateJob(String),

    #[error("no job named {0}")]
    UnknownJob(String),

    #[error("job {name}: {reason}")]
    InvalidSchedule { name: String, reason: String },
}

impl Classified for SchedulerError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

// ─── Schedule ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Wall-clock time in the exchange time zone.
    DailyAt { time: NaiveTime, weekdays_only: bool },
    Every(Duration),
}

impl Schedule {
    /// First fire strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, calendar: &ExchangeCalendar) -> Option<DateTime<Utc>> {
        match self {
            Self::Every(period) => Some(after + *period),
            Self::DailyAt {
                time,
                weekdays_only,
            } => {
                let mut date = calendar.local_date(after);
                // A week always contains a weekday.
                for _ in 0..8 {
                    let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
                    if !(*weekdays_only && weekend) {
                        if let Some(at) = calendar.at_local(date, *time) {
                            if at > after {
                                return Some(at);
                            }
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
        }
    }

    fn validate(&self, name: &str) -> Result<(), SchedulerError> {
        match self {
            Self::Every(period) if *period <= Duration::zero() => {
                Err(SchedulerError::InvalidSchedule {
                    name: name.to_string(),
                    reason: format!("period must be positive, got {period}"),
                })
            }
            _ => Ok(()),
        }
    }
}

// ─── Jobs ───────────────────────────────────────────────────────────

/// Work started by the scheduler. Errors are logged and counted.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub error_count: u64,
    pub running: bool,
}

struct Job {
    name: String,
    schedule: Schedule,
    handler: Arc<dyn JobHandler>,
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
    error_count: u64,
    running: bool,
}

impl Job {
    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name.clone(),
            next_run: self.next_run,
            last_run: self.last_run,
            run_count: self.run_count,
            error_count: self.error_count,
            running: self.running,
        }
    }
}

/// A job the scheduler decided to start.
pub struct DueJob {
    pub name: String,
    pub scheduled_for: DateTime<Utc>,
    handler: Arc<dyn JobHandler>,
}

// ─── Scheduler ──────────────────────────────────────────────────────

const MAX_COALESCED: u32 = 10_000;

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    calendar: ExchangeCalendar,
    grace: Duration,
    jobs: Mutex<Vec<Job>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, calendar: ExchangeCalendar, grace: Duration) -> Self {
        Self {
            clock,
            calendar,
            grace,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn add(
        &self,
        name: impl Into<String>,
        schedule: Schedule,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), SchedulerError> {
        let name = name.into();
        schedule.validate(&name)?;
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|j| j.name == name) {
            return Err(SchedulerError::DuplicateJob(name));
        }
        let next_run = schedule.next_after(self.clock.now(), &self.calendar);
        info!(job = %name, next_run = ?next_run, "job registered");
        jobs.push(Job {
            name,
            schedule,
            handler,
            next_run,
            last_run: None,
            run_count: 0,
            error_count: 0,
            running: false,
        });
        Ok(())
    }

    /// Pull the job's next fire forward to `delay` from now. The regular
    /// schedule resumes after that run.
    pub fn defer_once(&self, name: &str, delay: Duration) -> Result<(), SchedulerError> {
        let at = self.clock.now() + delay;
        let mut jobs = self.jobs.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.name == name)
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
        job.next_run = Some(job.next_run.map_or(at, |n| n.min(at)));
        debug!(job = name, at = %at, "one-off run scheduled");
        Ok(())
    }

    pub fn status(&self) -> Vec<JobStatus> {
        self.jobs.lock().iter().map(Job::status).collect()
    }

    /// Jobs to start at `now`, marked running. Each job's next fire moves past
    /// `now`, so however many fires were missed at most one run results.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let mut jobs = self.jobs.lock();
        let mut due = Vec::new();
        for job in jobs.iter_mut() {
            let Some(mut scheduled_for) = job.next_run.filter(|at| *at <= now) else {
                continue;
            };
            job.next_run = job.schedule.next_after(now, &self.calendar);

            // Collapse every fire up to `now` into the latest one.
            let mut missed = 0u32;
            while missed < MAX_COALESCED {
                match job.schedule.next_after(scheduled_for, &self.calendar) {
                    Some(n) if n <= now => {
                        scheduled_for = n;
                        missed += 1;
                    }
                    _ => break,
                }
            }
            if missed > 0 {
                debug!(job = %job.name, missed, "missed fires coalesced");
            }

            let late = now - scheduled_for;
            if late > self.grace {
                warn!(
                    job = %job.name,
                    scheduled_for = %scheduled_for,
                    late_secs = late.num_seconds(),
                    "missed fire outside grace window, skipped"
                );
                continue;
            }
            if job.running {
                warn!(job = %job.name, "previous run still active, fire skipped");
                continue;
            }
            job.running = true;
            job.last_run = Some(now);
            due.push(DueJob {
                name: job.name.clone(),
                scheduled_for,
                handler: Arc::clone(&job.handler),
            });
        }
        due
    }

    fn finish(&self, name: &str, ok: bool) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.iter_mut().find(|j| j.name == name) {
            job.running = false;
            job.run_count += 1;
            if !ok {
                job.error_count += 1;
            }
        }
    }

    /// Run one due job to completion and record the outcome. A panicking
    /// handler counts as a failed run.
    pub async fn execute(&self, job: DueJob) {
        let started = std::time::Instant::now();
        info!(job = %job.name, scheduled_for = %job.scheduled_for, "job started");
        let handler = Arc::clone(&job.handler);
        let outcome = tokio::spawn(async move { handler.run().await }).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let ok = match outcome {
            Ok(Ok(())) => {
                info!(job = %job.name, elapsed_ms, "job finished");
                true
            }
            Ok(Err(e)) => {
                error!(job = %job.name, elapsed_ms, error = %e, "job failed");
                false
            }
            Err(e) => {
                error!(job = %job.name, elapsed_ms, error = %e, "job panicked");
                false
            }
        };
        self.finish(&job.name, ok);
    }

    /// Tick until cancelled, spawning each due job on its own task.
    pub async fn run(self: Arc<Self>, tick: std::time::Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(jobs = self.jobs.lock().len(), "scheduler started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for job in self.due(self.clock.now()) {
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.execute(job).await });
            }
        }
        info!("scheduler stopped");
    }
}
