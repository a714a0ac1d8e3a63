//! Alerts eligible providers about unclaimed work.
//!
//! One provider per (state, pathway) at a time: after a dispatch the pair is
//! recorded in `state_pathway_notified` and stays quiet until the row is
//! cleared, either when its last unclaimed case is claimed or once older than
//! the notifier cooldown.

mod snooze;

pub use snooze::{is_snoozed, local_hour, resolve_timezone};

use std::collections::HashSet;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::context::Env;
use crate::error::{RoutingError, RoutingResult};
use crate::models::{CareProvidingState, CareProvidingStateId, CaseId, Pathway, Provider, ProviderId};

/// Delivery failed at the SMS/push collaborator.
#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound "notify provider P about case C".
pub trait NotificationSink: Send + Sync {
    fn notify_provider(&self, provider: &Provider, case_id: CaseId) -> Result<(), NotifyError>;
}

/// A notification that went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub provider_id: ProviderId,
    pub case_id: CaseId,
    pub care_providing_state_id: CareProvidingStateId,
}

/// Result for one (state, pathway).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Dispatched(Dispatch),
    /// Ledger row present
    AlreadyNotified,
    /// Nothing unheld waiting
    NothingPending,
    /// Every eligible provider is snoozed, cooling down, or opted out
    NoCandidate,
    /// Another instance holds the lock
    Locked,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotifierReport {
    pub dispatched: Vec<Dispatch>,
    pub ledgers_cleared: usize,
    pub skipped_locked: usize,
    pub no_candidate: usize,
    pub failures: usize,
    pub deadline_hit: bool,
}

pub struct Notifier<'a> {
    env: Env<'a>,
    sink: &'a dyn NotificationSink,
    holder: &'a str,
}

impl<'a> Notifier<'a> {
    /// `holder` identifies this instance in the advisory lock table.
    pub fn new(env: Env<'a>, sink: &'a dyn NotificationSink, holder: &'a str) -> Self {
        Self { env, sink, holder }
    }

    /// One pass over every (state, pathway) with unheld unclaimed work.
    ///
    /// Failures are logged per target and never escalated; the next pass
    /// retries.
    pub fn run_once(&self) -> RoutingResult<NotifierReport> {
        let mut report = NotifierReport::default();
        let cutoff = self.env.now() - self.env.config.notifier_cooldown;
        report.ledgers_cleared = self
            .env
            .atomic(|| Ok(self.env.db.clear_state_pathway_notified_before(cutoff)?))?;

        for target in self.env.db.pending_notification_targets()? {
            if self.env.check_deadline().is_err() {
                report.deadline_hit = true;
                break;
            }
            match self.notify_for_state(target) {
                Ok(NotifyOutcome::Dispatched(dispatch)) => report.dispatched.push(dispatch),
                Ok(NotifyOutcome::Locked) => report.skipped_locked += 1,
                Ok(NotifyOutcome::NoCandidate) => report.no_candidate += 1,
                Ok(NotifyOutcome::AlreadyNotified | NotifyOutcome::NothingPending) => {}
                Err(e) if e.is_transient() => {
                    warn!(care_providing_state_id = %target, error = %e, "notification attempt failed");
                    report.failures += 1;
                }
                Err(e) => {
                    error!(care_providing_state_id = %target, error = %e, "notification attempt failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            dispatched = report.dispatched.len(),
            ledgers_cleared = report.ledgers_cleared,
            skipped_locked = report.skipped_locked,
            no_candidate = report.no_candidate,
            failures = report.failures,
            "notifier pass finished"
        );
        Ok(report)
    }

    /// Notify one provider about the oldest unheld case in a (state, pathway),
    /// unless the pair was already notified.
    pub fn notify_for_state(&self, target: CareProvidingStateId) -> RoutingResult<NotifyOutcome> {
        let state = self
            .env
            .db
            .get_care_providing_state(target)?
            .ok_or_else(|| RoutingError::NotFound(format!("care providing state {}", target)))?;
        let pathway = self.env.db.require_pathway(state.pathway_id)?;

        let lock = format!("notifier:{}:{}", state.state, pathway.tag);
        let acquired = self.env.db.try_acquire_lock(
            &lock,
            self.holder,
            self.env.config.lock_ttl,
            self.env.now(),
        )?;
        if !acquired {
            return Ok(NotifyOutcome::Locked);
        }

        let outcome = self.notify_locked(&state, &pathway);
        if let Err(e) = self.env.db.release_lock(&lock, self.holder) {
            warn!(lock = %lock, error = %e, "failed to release notifier lock");
        }
        outcome
    }

    fn notify_locked(
        &self,
        state: &CareProvidingState,
        pathway: &Pathway,
    ) -> RoutingResult<NotifyOutcome> {
        if self.env.db.state_pathway_notified_at(state.id)?.is_some() {
            return Ok(NotifyOutcome::AlreadyNotified);
        }
        let Some(entry) = self
            .env
            .db
            .unclaimed_in_state(state.id)?
            .into_iter()
            .find(|e| e.hold.is_none())
        else {
            return Ok(NotifyOutcome::NothingPending);
        };
        let Some(provider_id) = self.select_provider(state.id)? else {
            return Ok(NotifyOutcome::NoCandidate);
        };
        let provider = self.env.db.require_provider(provider_id)?;

        // Ledger and dispatch agree: a failed send rolls the ledger back.
        self.env.atomic(|| {
            let now = self.env.now();
            self.env
                .db
                .record_provider_notified(provider.id, entry.case_id, now)?;
            self.env.db.record_state_pathway_notified(state.id, now)?;
            self.sink
                .notify_provider(&provider, entry.case_id)
                .map_err(|e| RoutingError::Transient(e.to_string()))
        })?;

        info!(
            provider_id = %provider.id,
            case_id = %entry.case_id,
            state = %state.state,
            pathway = %pathway.tag,
            "provider notified"
        );
        Ok(NotifyOutcome::Dispatched(Dispatch {
            provider_id: provider.id,
            case_id: entry.case_id,
            care_providing_state_id: state.id,
        }))
    }

    /// Pick one provider for a (state, pathway).
    ///
    /// Candidates must have opted in, be outside their quiet hours and past
    /// the per-provider cooldown. Providers who could also cover another
    /// (state, pathway) with waiting work go last; then the least recently
    /// notified wins.
    pub fn select_provider(
        &self,
        target: CareProvidingStateId,
    ) -> RoutingResult<Option<ProviderId>> {
        let now = self.env.now();
        let cooldown_cutoff = now - self.env.config.provider_notify_cooldown;
        let busy: HashSet<CareProvidingStateId> = self
            .env
            .db
            .states_with_unclaimed_work()?
            .into_iter()
            .filter(|id| *id != target)
            .collect();

        let mut ranked = Vec::new();
        for candidate in self.env.db.notification_candidates(target)? {
            if candidate
                .last_notified
                .is_some_and(|at| at > cooldown_cutoff)
            {
                continue;
            }
            let tz = resolve_timezone(candidate.timezone.as_deref());
            let windows = self.env.db.snoozes_for(candidate.provider_id)?;
            if is_snoozed(&windows, tz, now) {
                continue;
            }
            let overlaps = self
                .env
                .db
                .eligible_care_providing_states(candidate.provider_id)?
                .iter()
                .any(|id| busy.contains(id));
            ranked.push((overlaps, candidate.last_notified, candidate.provider_id));
        }
        ranked.sort();
        Ok(ranked.first().map(|(_, _, provider)| *provider))
    }
}
