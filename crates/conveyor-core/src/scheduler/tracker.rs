//! Tracker - "is this job due?"

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::Schedule;
use crate::config::millis;
use crate::ports::{Clock, later};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMode {
    /// Always due.
    Continuous,
    /// Due once the interval has passed since the last "no work" signal.
    Interval(TimeDelta),
}

impl From<&Schedule> for TrackerMode {
    fn from(schedule: &Schedule) -> Self {
        match schedule {
            Schedule::Continuous => TrackerMode::Continuous,
            Schedule::Interval { every_ms } => TrackerMode::Interval(millis(*every_ms)),
        }
    }
}

/// Per-job due-ness, shared by the starter and that job's runners.
pub struct Tracker {
    mode: TrackerMode,
    clock: Arc<dyn Clock>,
    /// Unix millis; `i64::MIN` means due right away.
    next_eligible_ms: AtomicI64,
}

impl Tracker {
    pub fn new(mode: TrackerMode, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode,
            clock,
            next_eligible_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn continuous(clock: Arc<dyn Clock>) -> Self {
        Self::new(TrackerMode::Continuous, clock)
    }

    pub fn interval(every: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self::new(TrackerMode::Interval(every), clock)
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    pub fn should_run(&self) -> bool {
        match self.mode {
            TrackerMode::Continuous => true,
            TrackerMode::Interval(_) => {
                self.clock.now().timestamp_millis() >= self.next_eligible_ms.load(Ordering::Acquire)
            }
        }
    }

    /// A runner found nothing to do: wait a full interval before the next check.
    pub fn work_done(&self) {
        if let TrackerMode::Interval(every) = self.mode {
            let next = later(self.clock.now(), every).timestamp_millis();
            self.next_eligible_ms.store(next, Ordering::Release);
        }
    }

    pub fn next_eligible(&self) -> Option<DateTime<Utc>> {
        match self.next_eligible_ms.load(Ordering::Acquire) {
            i64::MIN => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}
