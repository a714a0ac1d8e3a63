//! Admission policy for submitted visits.
//!
//! Paths, first match wins:
//!
//! 1. care continuity: the case already has a permanent doctor
//! 2. care-team history: the patient's doctor from an earlier case on the
//!    same pathway is still eligible in the patient's current state
//! 3. designated provider: the patient picked an eligible doctor
//! 4. unclaimed: the case waits in the global queue for its (state, pathway)

use tracing::info;

use crate::care_team::CareTeamService;
use crate::context::Env;
use crate::error::{RoutingError, RoutingResult};
use crate::models::{
    CareProvidingState, CaseStatus, Pathway, ProviderId, QueueEvent, UnclaimedEntry, Visit,
    VisitId, VisitStatus,
};
use crate::queue::QueueService;

/// Where a visit went.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    CareContinuity { provider: ProviderId },
    CareTeamHistory { provider: ProviderId },
    DesignatedProvider { provider: ProviderId },
    Unclaimed { entry: UnclaimedEntry },
}

impl RouteDecision {
    pub fn provider(&self) -> Option<ProviderId> {
        match self {
            RouteDecision::CareContinuity { provider }
            | RouteDecision::CareTeamHistory { provider }
            | RouteDecision::DesignatedProvider { provider } => Some(*provider),
            RouteDecision::Unclaimed { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RouteDecision::CareContinuity { .. } => "care-continuity",
            RouteDecision::CareTeamHistory { .. } => "care-team-history",
            RouteDecision::DesignatedProvider { .. } => "designated-provider",
            RouteDecision::Unclaimed { .. } => "unclaimed",
        }
    }
}

pub struct Router<'a> {
    env: Env<'a>,
}

impl<'a> Router<'a> {
    pub fn new(env: Env<'a>) -> Self {
        Self { env }
    }

    /// Route a submitted (initial or follow-up) visit.
    ///
    /// Opening an unclaimed case for review is not routing; only an explicit
    /// temp claim changes its state.
    pub fn route_visit(&self, visit_id: VisitId) -> RoutingResult<RouteDecision> {
        self.env.atomic(|| {
            let db = self.env.db;
            let now = self.env.now();
            let visit = db.require_visit(visit_id)?;
            let case = db.require_case(visit.case_id)?;
            if case.status.is_closed() {
                return Err(RoutingError::InvalidInput(format!(
                    "case {} is {} and cannot be routed",
                    case.id,
                    case.status.as_str()
                )));
            }
            let patient = db.require_patient(case.patient_id)?;
            let pathway = db.require_pathway(case.pathway_id)?;
            let state = db.ensure_care_providing_state(&patient.state, pathway.id, now)?;

            db.update_case_status(&case, CaseStatus::Active, now)?;

            let team = CareTeamService::new(self.env);
            let decision = if let Some(provider) = team.active_doctor(case.id)? {
                RouteDecision::CareContinuity { provider }
            } else if let Some(provider) = self.previous_doctor(&visit, &pathway, &state)? {
                team.change_provider(case.id, provider, None)?;
                RouteDecision::CareTeamHistory { provider }
            } else if let Some(provider) = self.designated_doctor(&visit, &state)? {
                team.change_provider(case.id, provider, None)?;
                RouteDecision::DesignatedProvider { provider }
            } else {
                let queue = QueueService::new(self.env);
                queue.enqueue_unclaimed(case.id, state.id)?;
                let entry = db.get_unclaimed(case.id)?.ok_or_else(|| {
                    RoutingError::NotFound(format!("unclaimed entry for case {}", case.id))
                })?;
                RouteDecision::Unclaimed { entry }
            };

            if let Some(provider) = decision.provider() {
                QueueService::new(self.env)
                    .enqueue_pending(provider, &QueueEvent::patient_visit(&visit, &pathway.medicine_branch))?;
                db.mark_case_claimed(case.id, now)?;
            }
            db.update_visit_status(visit.id, VisitStatus::Routed, now)?;

            info!(
                case_id = %case.id,
                visit_id = %visit.id,
                state = %state.state,
                pathway = %pathway.tag,
                route = decision.label(),
                provider_id = ?decision.provider(),
                "visit routed"
            );
            Ok(decision)
        })
    }

    fn previous_doctor(
        &self,
        visit: &Visit,
        pathway: &Pathway,
        state: &CareProvidingState,
    ) -> RoutingResult<Option<ProviderId>> {
        let case = self.env.db.require_case(visit.case_id)?;
        let Some(provider) = self
            .env
            .db
            .last_doctor_for(case.patient_id, pathway.id, case.id)?
        else {
            return Ok(None);
        };
        let eligible = self.env.db.is_provider_eligible(provider, state.id)?;
        Ok(eligible.then_some(provider))
    }

    fn designated_doctor(
        &self,
        visit: &Visit,
        state: &CareProvidingState,
    ) -> RoutingResult<Option<ProviderId>> {
        let Some(provider) = visit.designated_provider else {
            return Ok(None);
        };
        let eligible = self.env.db.is_provider_eligible(provider, state.id)?;
        Ok(eligible.then_some(provider))
    }
}
