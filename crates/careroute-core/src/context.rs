//! Per-request environment shared by the services.

use chrono::{DateTime, Utc};

use crate::clock::{Clock, Deadline};
use crate::config::RoutingConfig;
use crate::db::Database;
use crate::error::{RoutingError, RoutingResult};

/// Store, configuration, time source and optional deadline for one unit of
/// work. Cheap to copy; services borrow it.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub db: &'a Database,
    pub config: &'a RoutingConfig,
    pub clock: &'a dyn Clock,
    pub deadline: Option<Deadline>,
}

impl<'a> Env<'a> {
    pub fn new(db: &'a Database, config: &'a RoutingConfig, clock: &'a dyn Clock) -> Self {
        Self {
            db,
            config,
            clock,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn check_deadline(&self) -> RoutingResult<()> {
        match self.deadline {
            Some(deadline) => deadline.check(self.clock),
            None => Ok(()),
        }
    }

    /// Run `f` inside one transaction.
    ///
    /// The deadline is checked before starting and again before committing;
    /// any error rolls everything back. Nested calls become savepoints.
    pub fn atomic<T, F>(&self, f: F) -> RoutingResult<T>
    where
        F: FnOnce() -> RoutingResult<T>,
    {
        self.check_deadline()?;
        let tx = self.db.begin().map_err(RoutingError::from)?;
        let value = f()?;
        self.check_deadline()?;
        tx.commit().map_err(RoutingError::from)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    fn count(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM patient", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_atomic_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let config = RoutingConfig::default();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let env = Env::new(&db, &config, &clock);

        let result: RoutingResult<()> = env.atomic(|| {
            db.insert_patient("CA", env.now())?;
            Err(RoutingError::InvalidInput("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_deadline_passing_mid_work_aborts_commit() {
        let db = Database::open_in_memory().unwrap();
        let config = RoutingConfig::default();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let env = Env::new(&db, &config, &clock)
            .with_deadline(Deadline::after(start, Duration::seconds(5)));

        let result = env.atomic(|| {
            db.insert_patient("CA", env.now())?;
            clock.advance(Duration::seconds(10));
            Ok(())
        });
        assert!(matches!(result, Err(RoutingError::DeadlineExceeded)));
        assert_eq!(count(&db), 0);

        // Already expired: nothing starts
        let result = env.atomic(|| Ok(()));
        assert!(matches!(result, Err(RoutingError::DeadlineExceeded)));
    }
}
