//! Care-team membership.

use tracing::info;

use crate::context::Env;
use crate::error::{RoutingError, RoutingResult};
use crate::models::{
    AssignmentStatus, CareRole, CareTeamAssignment, CaseId, NoteTag, ProviderId,
};
use crate::queue::QueueService;

/// The configured primary coordinator must be a CC. A provider that does not
/// exist yet is only an error when `required`.
pub(crate) fn check_primary_coordinator(
    role: Option<CareRole>,
    id: ProviderId,
    required: bool,
) -> RoutingResult<()> {
    match role {
        Some(CareRole::Coordinator) => Ok(()),
        Some(other) => Err(RoutingError::InvalidInput(format!(
            "primary coordinator {} has role {}",
            id,
            other.as_str()
        ))),
        None if required => Err(RoutingError::InvalidInput(format!(
            "primary coordinator {} does not exist",
            id
        ))),
        None => Ok(()),
    }
}

pub struct CareTeamService<'a> {
    env: Env<'a>,
}

impl<'a> CareTeamService<'a> {
    pub fn new(env: Env<'a>) -> Self {
        Self { env }
    }

    /// Attach the primary coordinator. No-op without one configured, or when
    /// the case already has a live coordinator.
    pub fn add_coordinator(&self, case_id: CaseId) -> RoutingResult<Option<CareTeamAssignment>> {
        let Some(cc) = self.env.config.primary_cc_id else {
            return Ok(None);
        };
        check_primary_coordinator(self.env.db.get_provider(cc)?.map(|p| p.role), cc, true)?;
        if let Some(existing) = self.env.db.live_assignment(case_id, CareRole::Coordinator)? {
            return Ok(Some(existing));
        }
        let row = self.env.db.insert_assignment(
            case_id,
            cc,
            CareRole::Coordinator,
            AssignmentStatus::Active,
            self.env.now(),
        )?;
        Ok(Some(row))
    }

    /// Make `new_provider` the case's permanent doctor.
    ///
    /// Whoever held the doctor slot (temporarily or permanently) is
    /// deactivated, the case leaves the unclaimed queue and is marked claimed.
    /// `author` is None for routing decisions.
    pub fn change_provider(
        &self,
        case_id: CaseId,
        new_provider: ProviderId,
        author: Option<ProviderId>,
    ) -> RoutingResult<CareTeamAssignment> {
        self.env.atomic(|| {
            let now = self.env.now();
            self.env.db.require_case(case_id)?;
            let current = self.env.db.live_assignment(case_id, CareRole::Doctor)?;
            if let Some(row) = &current {
                if row.provider_id == new_provider && row.status == AssignmentStatus::Active {
                    return Ok(row.clone());
                }
                self.env
                    .db
                    .set_assignment_status(row.id, AssignmentStatus::Inactive, now)?;
            }

            let row = self.env.db.insert_assignment(
                case_id,
                new_provider,
                CareRole::Doctor,
                AssignmentStatus::Active,
                now,
            )?;
            QueueService::new(self.env).dequeue_unclaimed(case_id)?;
            self.env.db.mark_case_claimed(case_id, now)?;

            let previous = current
                .map(|r| r.provider_id.to_string())
                .unwrap_or_else(|| "none".to_string());
            self.env.db.insert_note(
                case_id,
                author,
                NoteTag::ProviderChanged,
                &format!("Doctor changed from {} to {}", previous, new_provider),
                now,
            )?;

            info!(case_id = %case_id, provider_id = %new_provider, previous = %previous, "doctor assigned");
            Ok(row)
        })
    }

    /// Doctor holding the case permanently.
    pub fn active_doctor(&self, case_id: CaseId) -> RoutingResult<Option<ProviderId>> {
        self.active_member(case_id, CareRole::Doctor)
    }

    pub fn active_coordinator(&self, case_id: CaseId) -> RoutingResult<Option<ProviderId>> {
        self.active_member(case_id, CareRole::Coordinator)
    }

    fn active_member(&self, case_id: CaseId, role: CareRole) -> RoutingResult<Option<ProviderId>> {
        Ok(self
            .env
            .db
            .live_assignment(case_id, role)?
            .filter(|row| row.status == AssignmentStatus::Active)
            .map(|row| row.provider_id))
    }

    pub fn members_of_case(
        &self,
        case_id: CaseId,
        include_inactive: bool,
    ) -> RoutingResult<Vec<CareTeamAssignment>> {
        let rows = self.env.db.assignments_for_case(case_id)?;
        Ok(rows
            .into_iter()
            .filter(|row| include_inactive || row.status.is_live())
            .collect())
    }
}
