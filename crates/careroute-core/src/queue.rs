//! Provider queues and the global unclaimed queue.

use tracing::debug;

use crate::context::Env;
use crate::error::{RoutingError, RoutingResult};
use crate::models::{
    CareProvidingStateId, CaseId, Completion, ProviderId, ProviderQueueItem, QueueEvent,
    QueueEventType, UnclaimedEntry,
};

/// Queue operations over one environment.
pub struct QueueService<'a> {
    env: Env<'a>,
}

impl<'a> QueueService<'a> {
    pub fn new(env: Env<'a>) -> Self {
        Self { env }
    }

    /// Put work into a provider's pending tab.
    ///
    /// Repeating the same (event type, reference) refreshes the open item's
    /// descriptions and keeps its position.
    pub fn enqueue_pending(
        &self,
        provider: ProviderId,
        event: &QueueEvent,
    ) -> RoutingResult<ProviderQueueItem> {
        let item = self
            .env
            .db
            .upsert_pending_item(provider, event, self.env.now())?;
        debug!(
            provider_id = %provider,
            event_type = event.event_type.as_str(),
            reference_id = event.reference_id,
            item_id = %item.id,
            "queue item pending"
        );
        Ok(item)
    }

    /// Move the matching item to history.
    pub fn mark_completed(
        &self,
        provider: ProviderId,
        event: &QueueEvent,
        outcome: Completion,
    ) -> RoutingResult<ProviderQueueItem> {
        let item = self
            .env
            .db
            .close_item(provider, event, outcome.into(), self.env.now())?;
        debug!(
            provider_id = %provider,
            event_type = event.event_type.as_str(),
            reference_id = event.reference_id,
            status = item.status.as_str(),
            "queue item closed"
        );
        Ok(item)
    }

    /// Flag a pending item as being worked on.
    pub fn mark_ongoing(
        &self,
        provider: ProviderId,
        event_type: QueueEventType,
        reference_id: i64,
    ) -> RoutingResult<bool> {
        Ok(self
            .env
            .db
            .mark_item_ongoing(provider, event_type, reference_id, self.env.now())?)
    }

    /// Drop a provider's open items of one type on a case without completing them.
    pub fn remove_pending(
        &self,
        provider: ProviderId,
        case_id: CaseId,
        event_type: QueueEventType,
    ) -> RoutingResult<usize> {
        Ok(self
            .env
            .db
            .remove_open_items(provider, case_id, event_type, self.env.now())?)
    }

    pub fn list_pending(&self, provider: ProviderId) -> RoutingResult<Vec<ProviderQueueItem>> {
        Ok(self.env.db.list_pending_items(provider)?)
    }

    pub fn list_history(&self, provider: ProviderId) -> RoutingResult<Vec<ProviderQueueItem>> {
        Ok(self.env.db.list_history_items(provider)?)
    }

    /// Open items across providers carrying a branch-of-medicine tag.
    pub fn items_tagged(&self, tag: &str) -> RoutingResult<Vec<ProviderQueueItem>> {
        Ok(self.env.db.open_items_tagged(tag)?)
    }

    /// Admit an unclaimed, routable case into the global queue.
    pub fn enqueue_unclaimed(
        &self,
        case_id: CaseId,
        care_providing_state_id: CareProvidingStateId,
    ) -> RoutingResult<bool> {
        let case = self.env.db.require_case(case_id)?;
        if case.claimed {
            return Err(RoutingError::InvalidInput(format!(
                "case {} is claimed and cannot be queued as unclaimed",
                case_id
            )));
        }
        if !case.status.is_routable() {
            return Err(RoutingError::InvalidInput(format!(
                "case {} is {} and cannot be queued",
                case_id,
                case.status.as_str()
            )));
        }
        let inserted =
            self.env
                .db
                .insert_unclaimed(case_id, care_providing_state_id, self.env.now())?;
        debug!(case_id = %case_id, care_providing_state_id = %care_providing_state_id, inserted, "unclaimed entry");
        Ok(inserted)
    }

    /// Take a case out of the unclaimed queue.
    ///
    /// When this empties its (state, pathway), the notification ledger row
    /// for that pair is cleared as well.
    pub fn dequeue_unclaimed(&self, case_id: CaseId) -> RoutingResult<bool> {
        let Some(entry) = self.env.db.get_unclaimed(case_id)? else {
            return Ok(false);
        };
        self.env.db.delete_unclaimed(case_id)?;
        if self.env.db.count_unclaimed(entry.care_providing_state_id)? == 0
            && self
                .env
                .db
                .clear_state_pathway_notified(entry.care_providing_state_id)?
        {
            debug!(
                state = %entry.state,
                pathway = %entry.pathway_tag,
                "notification ledger cleared on claim"
            );
        }
        Ok(true)
    }

    /// Unclaimed entries the provider is eligible for, including temp-held ones.
    pub fn eligible_unclaimed(&self, provider: ProviderId) -> RoutingResult<Vec<UnclaimedEntry>> {
        Ok(self.env.db.unclaimed_for_provider(provider)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueueItemStatus;
    use crate::testing::Fixture;

    #[test]
    fn test_reassignment_keeps_position() {
        let f = Fixture::new();
        let queue = QueueService::new(f.env());
        let first = f.unclaimed_case();
        let second = f.unclaimed_case();

        f.set_minutes(10);
        queue
            .enqueue_pending(f.cc, &QueueEvent::case_assignment(first, "dermatology", "a"))
            .unwrap();
        f.set_minutes(20);
        queue
            .enqueue_pending(f.cc, &QueueEvent::case_assignment(second, "dermatology", "b"))
            .unwrap();
        f.set_minutes(30);
        queue
            .enqueue_pending(f.cc, &QueueEvent::case_assignment(first, "dermatology", "again"))
            .unwrap();

        let pending = queue.list_pending(f.cc).unwrap();
        let refs: Vec<i64> = pending.iter().map(|i| i.reference_id).collect();
        assert_eq!(refs, vec![first.get(), second.get()]);
        assert_eq!(pending[0].enqueued_at, f.at(10));
        assert_eq!(pending[0].long_description, "again");
    }

    #[test]
    fn test_triaged_completion() {
        let f = Fixture::new();
        let queue = QueueService::new(f.env());
        let case = f.unclaimed_case();
        let event = QueueEvent::case_message(case, "dermatology");
        queue.enqueue_pending(f.d1, &event).unwrap();

        let item = queue
            .mark_completed(f.d1, &event, Completion::Triaged)
            .unwrap();
        assert_eq!(item.status, QueueItemStatus::Triaged);
        assert_eq!(queue.list_history(f.d1).unwrap().len(), 1);
    }

    #[test]
    fn test_dequeue_last_entry_clears_ledger() {
        let f = Fixture::new();
        let queue = QueueService::new(f.env());
        let a = f.unclaimed_case();
        let b = f.unclaimed_case();
        f.db.record_state_pathway_notified(f.ca.id, f.at(0)).unwrap();

        assert!(queue.dequeue_unclaimed(a).unwrap());
        assert!(f.db.state_pathway_notified_at(f.ca.id).unwrap().is_some());

        assert!(queue.dequeue_unclaimed(b).unwrap());
        assert!(f.db.state_pathway_notified_at(f.ca.id).unwrap().is_none());
        assert!(!queue.dequeue_unclaimed(b).unwrap());
    }

    #[test]
    fn test_claimed_case_not_queued() {
        let f = Fixture::new();
        let queue = QueueService::new(f.env());
        let case = f.unclaimed_case();
        queue.dequeue_unclaimed(case).unwrap();
        f.db.mark_case_claimed(case, f.at(0)).unwrap();

        let err = queue.enqueue_unclaimed(case, f.ca.id).unwrap_err();
        assert!(matches!(err, RoutingError::InvalidInput(_)));
    }

    #[test]
    fn test_eligible_unclaimed_for_both_doctors() {
        let f = Fixture::new();
        let queue = QueueService::new(f.env());
        let case = f.unclaimed_case();
        for doctor in [f.d1, f.d2] {
            let entries = queue.eligible_unclaimed(doctor).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].case_id, case);
        }
        assert!(queue.eligible_unclaimed(f.cc).unwrap().is_empty());
    }
}
