//! Time source and request deadlines.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{RoutingError, RoutingResult};

/// Process-wide time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Absolute instant after which a unit of work must not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: DateTime<Utc>,
}

impl Deadline {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    pub fn after(now: DateTime<Utc>, timeout: Duration) -> Self {
        Self { at: now + timeout }
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now() > self.at
    }

    pub fn check(&self, clock: &dyn Clock) -> RoutingResult<()> {
        if self.expired(clock) {
            return Err(RoutingError::DeadlineExceeded);
        }
        Ok(())
    }
}
