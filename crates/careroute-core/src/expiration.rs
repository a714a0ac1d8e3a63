//! Periodic sweep revoking stalled temporary claims.

use tracing::{error, info, warn};

use crate::claim::{ClaimManager, Revocation};
use crate::context::Env;
use crate::error::{RoutingError, RoutingResult};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub revoked: Vec<Revocation>,
    /// Shards another instance was sweeping
    pub shards_skipped: Vec<u32>,
    pub failures: usize,
    /// Stopped early; the rest is picked up next tick
    pub deadline_hit: bool,
}

pub struct ExpirationWorker<'a> {
    env: Env<'a>,
    holder: &'a str,
}

impl<'a> ExpirationWorker<'a> {
    /// `holder` identifies this instance in the advisory lock table.
    pub fn new(env: Env<'a>, holder: &'a str) -> Self {
        Self { env, holder }
    }

    /// Sweep every shard this instance can lock.
    ///
    /// Errors are logged and counted, never returned.
    pub fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for shard in 0..self.env.config.expiration_shards.max(1) {
            if self.env.check_deadline().is_err() {
                report.deadline_hit = true;
                break;
            }
            let lock = format!("expiration:{}", shard);
            match self.env.db.try_acquire_lock(
                &lock,
                self.holder,
                self.env.config.lock_ttl,
                self.env.now(),
            ) {
                Ok(true) => {}
                Ok(false) => {
                    report.shards_skipped.push(shard);
                    continue;
                }
                Err(e) => {
                    log_failure(shard, &e.into());
                    report.failures += 1;
                    continue;
                }
            }

            if let Err(e) = self.sweep_shard(shard, &mut report) {
                log_failure(shard, &e);
                report.failures += 1;
            }
            if let Err(e) = self.env.db.release_lock(&lock, self.holder) {
                warn!(lock = %lock, error = %e, "failed to release expiration lock");
            }
            if report.deadline_hit {
                break;
            }
        }

        info!(
            revoked = report.revoked.len(),
            shards_skipped = report.shards_skipped.len(),
            failures = report.failures,
            deadline_hit = report.deadline_hit,
            "expiration sweep finished"
        );
        report
    }

    fn sweep_shard(&self, shard: u32, report: &mut SweepReport) -> RoutingResult<()> {
        let cutoff = self.env.now() - self.env.config.grace_period;
        let stale = self.env.db.temp_assignments_expired_before(
            cutoff,
            shard,
            self.env.config.expiration_shards,
        )?;
        let claims = ClaimManager::new(self.env);
        for row in stale {
            if self.env.check_deadline().is_err() {
                report.deadline_hit = true;
                return Ok(());
            }
            match claims.revoke(row.case_id) {
                Ok(Some(revocation)) => report.revoked.push(revocation),
                // Extended or promoted since the scan
                Ok(None) => {}
                Err(RoutingError::DeadlineExceeded) => {
                    report.deadline_hit = true;
                    return Ok(());
                }
                Err(e) => {
                    warn!(case_id = %row.case_id, error = %e, "revocation failed");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }
}

fn log_failure(shard: u32, e: &RoutingError) {
    if e.is_transient() {
        warn!(shard, error = %e, "expiration shard failed");
    } else {
        error!(shard, error = %e, "expiration shard failed");
    }
}
