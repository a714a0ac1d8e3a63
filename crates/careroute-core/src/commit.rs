//! Provider actions that commit to a case.
//!
//! Every action requires the caller to hold the case, temporarily or
//! permanently. Submitting a treatment plan, marking the case unsuitable and
//! messaging the patient make a temporary claim permanent; saving a diagnosis
//! only extends it.

use tracing::info;

use crate::care_team::CareTeamService;
use crate::claim::ClaimManager;
use crate::context::Env;
use crate::error::RoutingResult;
use crate::models::{
    CaseId, CaseMessage, CaseStatus, ClaimState, Completion, MessageAuthor, NoteTag,
    PromotionReason, ProviderId, QueueEvent, QueueEventType, VisitStatus,
};
use crate::queue::QueueService;

pub struct CommitGateway<'a> {
    env: Env<'a>,
}

impl<'a> CommitGateway<'a> {
    pub fn new(env: Env<'a>) -> Self {
        Self { env }
    }

    fn claims(&self) -> ClaimManager<'a> {
        ClaimManager::new(self.env)
    }

    fn branch(&self, case_id: CaseId) -> RoutingResult<String> {
        let case = self.env.db.require_case(case_id)?;
        Ok(self.env.db.require_pathway(case.pathway_id)?.medicine_branch)
    }

    /// Submit the treatment plan for the case's latest visit.
    pub fn submit_treatment_plan(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<()> {
        self.env.atomic(|| {
            let claims = self.claims();
            claims.authorize(case_id, provider)?;
            claims.promote(case_id, provider, PromotionReason::TreatmentPlanSubmitted)?;

            let branch = self.branch(case_id)?;
            if let Some(visit) = self.env.db.latest_visit(case_id)? {
                if !visit.status.is_finished() {
                    QueueService::new(self.env).mark_completed(
                        provider,
                        &QueueEvent::patient_visit(&visit, &branch),
                        Completion::Completed,
                    )?;
                    self.env
                        .db
                        .update_visit_status(visit.id, VisitStatus::Treated, self.env.now())?;
                }
            }

            info!(case_id = %case_id, provider_id = %provider, "treatment plan submitted");
            Ok(())
        })
    }

    /// Triage the case out as unsuitable for online care and hand it to the
    /// coordinator.
    pub fn mark_unsuitable(
        &self,
        case_id: CaseId,
        provider: ProviderId,
        reason: &str,
    ) -> RoutingResult<()> {
        self.env.atomic(|| {
            let now = self.env.now();
            let claims = self.claims();
            claims.authorize(case_id, provider)?;
            claims.promote(case_id, provider, PromotionReason::MarkedUnsuitable)?;

            let branch = self.branch(case_id)?;
            let queue = QueueService::new(self.env);
            if let Some(visit) = self.env.db.latest_visit(case_id)? {
                if !visit.status.is_finished() {
                    queue.mark_completed(
                        provider,
                        &QueueEvent::patient_visit(&visit, &branch),
                        Completion::Triaged,
                    )?;
                    self.env
                        .db
                        .update_visit_status(visit.id, VisitStatus::Triaged, now)?;
                }
            }

            let case = self.env.db.require_case(case_id)?;
            self.env
                .db
                .update_case_status(&case, CaseStatus::Triaged, now)?;

            self.env
                .db
                .insert_note(case_id, Some(provider), NoteTag::MarkedUnsuitable, reason, now)?;
            if self.env.config.unsuitable_message_public {
                self.env.db.insert_message(
                    case_id,
                    MessageAuthor::Provider(provider),
                    reason,
                    false,
                    now,
                )?;
            }

            if let Some(cc) = CareTeamService::new(self.env).active_coordinator(case_id)? {
                queue.enqueue_pending(
                    cc,
                    &QueueEvent::case_assignment(
                        case_id,
                        &branch,
                        &format!("Marked unsuitable: {}", reason),
                    ),
                )?;
            }

            info!(case_id = %case_id, provider_id = %provider, "case marked unsuitable");
            Ok(())
        })
    }

    /// Post a doctor message to the patient.
    ///
    /// Replying implies accepting the case, so a temporary claim is promoted.
    pub fn doctor_message_patient(
        &self,
        case_id: CaseId,
        provider: ProviderId,
        body: &str,
    ) -> RoutingResult<CaseMessage> {
        self.env.atomic(|| {
            let claims = self.claims();
            if let ClaimState::TempClaimed { .. } = claims.authorize(case_id, provider)? {
                claims.promote(case_id, provider, PromotionReason::DoctorMessagedPatient)?;
            }
            let message = self.env.db.insert_message(
                case_id,
                MessageAuthor::Provider(provider),
                body,
                false,
                self.env.now(),
            )?;
            self.complete_reply(case_id, provider)?;
            Ok(message)
        })
    }

    /// Saving a diagnosis keeps a temporary claim alive.
    pub fn diagnose(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        self.env.atomic(|| {
            let claims = self.claims();
            match claims.authorize(case_id, provider)? {
                ClaimState::TempClaimed { .. } => claims.extend(case_id, provider),
                state => Ok(state),
            }
        })
    }

    /// Close the provider's open message item on the case as replied.
    pub(crate) fn complete_reply(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<()> {
        let open = self
            .env
            .db
            .open_item(provider, QueueEventType::CaseMessage, case_id.get())?;
        if let Some(item) = open {
            let event = QueueEvent::new(item.event_type, item.reference_id)
                .with_case(case_id)
                .with_descriptions(item.short_description, "Replied to patient");
            QueueService::new(self.env).mark_completed(provider, &event, Completion::Completed)?;
        }
        Ok(())
    }
}
