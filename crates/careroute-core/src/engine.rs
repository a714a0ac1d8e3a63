//! Inbound operations.
//!
//! `Engine` owns the store connection, the configuration and the clock, and
//! builds a fresh [`Env`] with a request deadline for every call.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::care_team::{check_primary_coordinator, CareTeamService};
use crate::claim::ClaimManager;
use crate::clock::{Clock, Deadline};
use crate::commit::CommitGateway;
use crate::config::RoutingConfig;
use crate::context::Env;
use crate::db::Database;
use crate::error::{codes, RoutingError, RoutingResult};
use crate::expiration::{ExpirationWorker, SweepReport};
use crate::models::{
    CareRole, CareTeamAssignment, CaseId, CaseMessage, CaseStatus, ClaimState, Completion,
    MessageAuthor, NoteTag, PathwayStatus, PatientId, PromotionReason, ProviderId,
    ProviderQueueItem, QueueEvent, QueueEventType, UnclaimedEntry, VisitId, VisitStatus,
};
use crate::notifier::{NotificationSink, Notifier, NotifierReport, NotifyOutcome};
use crate::queue::QueueService;
use crate::router::{RouteDecision, Router};

/// What happened to a submitted visit.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub case_id: CaseId,
    pub visit_id: VisitId,
    pub decision: RouteDecision,
    /// Immediate notification attempt for an unclaimed case
    pub notification: Option<NotifyOutcome>,
}

pub struct Engine {
    db: Database,
    config: RoutingConfig,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn NotificationSink>>,
    holder: String,
}

impl Engine {
    pub fn new(db: Database, config: RoutingConfig, clock: Arc<dyn Clock>) -> RoutingResult<Self> {
        config.validate()?;
        if let Some(cc) = config.primary_cc_id {
            let role = db.get_provider(cc)?.map(|p| p.role);
            check_primary_coordinator(role, cc, false)?;
        }
        Ok(Self {
            db,
            config,
            clock,
            sink: None,
            holder: Uuid::new_v4().to_string(),
        })
    }

    /// Notify a provider right away when a submitted visit goes unclaimed.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Advisory lock holder id of this instance.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Environment for one request, bounded by the request timeout.
    pub fn env(&self) -> Env<'_> {
        let env = Env::new(&self.db, &self.config, self.clock.as_ref());
        env.with_deadline(Deadline::after(env.now(), self.config.request_timeout))
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Open a new case for the patient on a pathway and route its first visit.
    pub fn submit_visit(
        &self,
        patient_id: PatientId,
        pathway_tag: &str,
        designated: Option<ProviderId>,
    ) -> RoutingResult<Admission> {
        let env = self.env();
        let (case_id, visit_id, decision) = env.atomic(|| {
            let now = env.now();
            self.db.require_patient(patient_id)?;
            let pathway = self
                .db
                .pathway_by_tag(pathway_tag)?
                .ok_or_else(|| RoutingError::NotFound(format!("pathway {}", pathway_tag)))?;
            if pathway.status != PathwayStatus::Active {
                return Err(RoutingError::InvalidInput(format!(
                    "pathway {} is {}",
                    pathway.tag,
                    pathway.status.as_str()
                )));
            }
            if let Some(provider) = designated {
                self.db.require_provider(provider)?;
            }

            let case = self.db.insert_case(patient_id, pathway.id, now)?;
            CareTeamService::new(env).add_coordinator(case.id)?;
            self.db
                .update_case_status(&case, CaseStatus::Submitted, now)?;
            self.route_new_visit(env, case.id, designated, false)
        })?;

        let notification = self.notify_if_unclaimed(&decision);
        Ok(Admission {
            case_id,
            visit_id,
            decision,
            notification,
        })
    }

    /// Submit a follow-up visit on an existing case.
    pub fn create_followup_visit(&self, case_id: CaseId) -> RoutingResult<Admission> {
        let env = self.env();
        let (case_id, visit_id, decision) =
            env.atomic(|| self.route_new_visit(env, case_id, None, true))?;
        let notification = self.notify_if_unclaimed(&decision);
        Ok(Admission {
            case_id,
            visit_id,
            decision,
            notification,
        })
    }

    fn route_new_visit(
        &self,
        env: Env<'_>,
        case_id: CaseId,
        designated: Option<ProviderId>,
        is_followup: bool,
    ) -> RoutingResult<(CaseId, VisitId, RouteDecision)> {
        let now = env.now();
        let visit = self.db.insert_visit(case_id, designated, is_followup, now)?;
        self.db
            .update_visit_status(visit.id, VisitStatus::Submitted, now)?;
        let decision = Router::new(env).route_visit(visit.id)?;
        Ok((case_id, visit.id, decision))
    }

    fn notify_if_unclaimed(&self, decision: &RouteDecision) -> Option<NotifyOutcome> {
        let RouteDecision::Unclaimed { entry } = decision else {
            return None;
        };
        let sink = self.sink.as_deref()?;
        match Notifier::new(self.env(), sink, &self.holder)
            .notify_for_state(entry.care_providing_state_id)
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                // The notifier pass retries
                warn!(case_id = %entry.case_id, error = %e, "immediate notification failed");
                None
            }
        }
    }

    // =========================================================================
    // Claims
    // =========================================================================

    /// A doctor opens an unclaimed case: take (or renew) the temporary claim
    /// and flag the visit item as in progress.
    pub fn start_review(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        let env = self.env();
        env.atomic(|| {
            let state = ClaimManager::new(env).acquire_temp(case_id, provider)?;
            if let Some(visit) = self.db.latest_visit(case_id)? {
                QueueService::new(env).mark_ongoing(
                    provider,
                    QueueEventType::PatientVisit,
                    visit.id.get(),
                )?;
            }
            Ok(state)
        })
    }

    /// Explicit claim from the unclaimed queue.
    pub fn claim_case(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        ClaimManager::new(self.env()).acquire_temp(case_id, provider)
    }

    pub fn claim_state(&self, case_id: CaseId) -> RoutingResult<ClaimState> {
        ClaimManager::new(self.env()).claimed_by(case_id)
    }

    // =========================================================================
    // Commit actions
    // =========================================================================

    pub fn submit_treatment_plan(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<()> {
        CommitGateway::new(self.env()).submit_treatment_plan(case_id, provider)
    }

    pub fn mark_unsuitable(
        &self,
        case_id: CaseId,
        provider: ProviderId,
        reason: &str,
    ) -> RoutingResult<()> {
        CommitGateway::new(self.env()).mark_unsuitable(case_id, provider, reason)
    }

    /// Saving a diagnosis extends a temporary claim.
    pub fn save_diagnosis(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        CommitGateway::new(self.env()).diagnose(case_id, provider)
    }

    /// Post a message on a case.
    ///
    /// A patient message lands in the coordinator's pending queue, or the
    /// doctor's when the case has no coordinator. A coordinator reply closes
    /// their message item; a doctor reply goes through the commit gateway.
    pub fn post_case_message(
        &self,
        case_id: CaseId,
        sender: MessageAuthor,
        body: &str,
    ) -> RoutingResult<CaseMessage> {
        if body.trim().is_empty() {
            return Err(RoutingError::InvalidInput("empty message".into()));
        }
        let env = self.env();
        match sender {
            MessageAuthor::Patient(patient_id) => env.atomic(|| {
                let case = self.db.require_case(case_id)?;
                if case.patient_id != patient_id {
                    return Err(RoutingError::InvalidInput(format!(
                        "case {} does not belong to patient {}",
                        case_id, patient_id
                    )));
                }
                let team = CareTeamService::new(env);
                let recipient = match team.active_coordinator(case_id)? {
                    Some(cc) => cc,
                    None => team.active_doctor(case_id)?.ok_or_else(|| {
                        RoutingError::InvalidInput(format!(
                            "case {} has no provider to receive messages",
                            case_id
                        ))
                    })?,
                };
                let message =
                    self.db
                        .insert_message(case_id, sender, body, false, env.now())?;
                let branch = self.db.require_pathway(case.pathway_id)?.medicine_branch;
                QueueService::new(env)
                    .enqueue_pending(recipient, &QueueEvent::case_message(case_id, &branch))?;
                Ok(message)
            }),
            MessageAuthor::Provider(provider) => {
                let gateway = CommitGateway::new(env);
                if CareTeamService::new(env).active_coordinator(case_id)? == Some(provider) {
                    env.atomic(|| {
                        let message =
                            self.db
                                .insert_message(case_id, sender, body, false, env.now())?;
                        gateway.complete_reply(case_id, provider)?;
                        Ok(message)
                    })
                } else {
                    gateway.doctor_message_patient(case_id, provider, body)
                }
            }
        }
    }

    /// Messages on a case as seen by a provider. Viewing clears the
    /// provider's pending message and assignment items for the case.
    pub fn view_case_messages(
        &self,
        case_id: CaseId,
        viewer: ProviderId,
    ) -> RoutingResult<Vec<CaseMessage>> {
        let env = self.env();
        env.atomic(|| {
            self.db.require_case(case_id)?;
            let queue = QueueService::new(env);
            queue.remove_pending(viewer, case_id, QueueEventType::CaseMessage)?;
            queue.remove_pending(viewer, case_id, QueueEventType::CaseAssignment)?;
            Ok(self.db.messages_for_case(case_id)?)
        })
    }

    // =========================================================================
    // Assignment between care-team members
    // =========================================================================

    /// Hand a case to the care-team member holding `target_role`.
    ///
    /// The author's own assignment item moves to history and the target's
    /// pending item is created or refreshed in place. A doctor still holding
    /// the case temporarily accepts it by assigning it to the coordinator.
    pub fn assign_case(
        &self,
        case_id: CaseId,
        author: ProviderId,
        target_role: CareRole,
        message: &str,
    ) -> RoutingResult<ProviderQueueItem> {
        let env = self.env();
        env.atomic(|| {
            let now = env.now();
            let case = self.db.require_case(case_id)?;
            let team = CareTeamService::new(env);
            let claims = ClaimManager::new(env);

            let author_claim = if team.active_coordinator(case_id)? == Some(author) {
                None
            } else {
                Some(claims.authorize(case_id, author)?)
            };

            let target = match target_role {
                CareRole::Coordinator => team.active_coordinator(case_id)?,
                CareRole::Doctor => team.active_doctor(case_id)?,
            }
            .ok_or_else(|| {
                RoutingError::InvalidInput(format!(
                    "case {} has no active {}",
                    case_id,
                    target_role.as_str()
                ))
            })?;
            if target == author {
                return Err(RoutingError::InvalidInput(format!(
                    "provider {} cannot assign case {} to themselves",
                    author, case_id
                )));
            }

            if let Some(ClaimState::TempClaimed { .. }) = author_claim {
                if target_role == CareRole::Coordinator {
                    claims.promote(case_id, author, PromotionReason::CaseAssigned)?;
                }
            }

            let branch = self.db.require_pathway(case.pathway_id)?.medicine_branch;
            let queue = QueueService::new(env);
            if let Some(own) =
                self.db
                    .open_item(author, QueueEventType::CaseAssignment, case_id.get())?
            {
                let event = QueueEvent::new(own.event_type, own.reference_id)
                    .with_case(case_id)
                    .with_descriptions(own.short_description, own.long_description);
                queue.mark_completed(author, &event, Completion::Completed)?;
            }
            let item =
                queue.enqueue_pending(target, &QueueEvent::case_assignment(case_id, &branch, message))?;

            self.db.insert_note(
                case_id,
                Some(author),
                NoteTag::CaseAssigned,
                &format!("Assigned to {} {}: {}", target_role.as_str(), target, message),
                now,
            )?;
            info!(
                case_id = %case_id,
                provider_id = %author,
                target = %target,
                role = target_role.as_str(),
                "case assigned"
            );
            Ok(item)
        })
    }

    /// Reassign the case's doctor outright.
    pub fn change_provider(
        &self,
        case_id: CaseId,
        new_provider: ProviderId,
        author: ProviderId,
    ) -> RoutingResult<CareTeamAssignment> {
        let env = self.env();
        env.atomic(|| {
            let team = CareTeamService::new(env);
            if team.active_coordinator(case_id)? != Some(author) {
                return Err(RoutingError::forbidden(
                    codes::NOT_CASE_PROVIDER,
                    format!("provider {} is not the coordinator of case {}", author, case_id),
                ));
            }
            let provider = self.db.require_provider(new_provider)?;
            if provider.role != CareRole::Doctor {
                return Err(RoutingError::InvalidInput(format!(
                    "provider {} is not a doctor",
                    new_provider
                )));
            }
            team.change_provider(case_id, new_provider, Some(author))
        })
    }

    pub fn care_team(
        &self,
        case_id: CaseId,
        include_inactive: bool,
    ) -> RoutingResult<Vec<CareTeamAssignment>> {
        CareTeamService::new(self.env()).members_of_case(case_id, include_inactive)
    }

    // =========================================================================
    // Provider events outside a case visit
    // =========================================================================

    /// Queue a refill request or prescription transmission error for a doctor.
    pub fn enqueue_provider_event(
        &self,
        provider: ProviderId,
        event_type: QueueEventType,
        reference_id: i64,
        case_id: Option<CaseId>,
        short_description: &str,
        long_description: &str,
    ) -> RoutingResult<ProviderQueueItem> {
        provider_event_type(event_type)?;
        let env = self.env();
        env.atomic(|| {
            self.db.require_provider(provider)?;
            let mut event = QueueEvent::new(event_type, reference_id)
                .with_descriptions(short_description, long_description);
            if let Some(case_id) = case_id {
                let case = self.db.require_case(case_id)?;
                let branch = self.db.require_pathway(case.pathway_id)?.medicine_branch;
                event = event.with_case(case_id).with_tag(branch);
            }
            QueueService::new(env).enqueue_pending(provider, &event)
        })
    }

    pub fn resolve_provider_event(
        &self,
        provider: ProviderId,
        event_type: QueueEventType,
        reference_id: i64,
    ) -> RoutingResult<ProviderQueueItem> {
        provider_event_type(event_type)?;
        let env = self.env();
        env.atomic(|| {
            let open = self
                .db
                .open_item(provider, event_type, reference_id)?
                .ok_or_else(|| {
                    RoutingError::NotFound(format!(
                        "open {} {} for provider {}",
                        event_type.as_str(),
                        reference_id,
                        provider
                    ))
                })?;
            let mut event = QueueEvent::new(event_type, reference_id)
                .with_descriptions(open.short_description, open.long_description);
            if let Some(case_id) = open.case_id {
                event = event.with_case(case_id);
            }
            QueueService::new(env).mark_completed(provider, &event, Completion::Completed)
        })
    }

    // =========================================================================
    // Queue reads
    // =========================================================================

    pub fn pending_queue(&self, provider: ProviderId) -> RoutingResult<Vec<ProviderQueueItem>> {
        QueueService::new(self.env()).list_pending(provider)
    }

    pub fn history_queue(&self, provider: ProviderId) -> RoutingResult<Vec<ProviderQueueItem>> {
        QueueService::new(self.env()).list_history(provider)
    }

    pub fn unclaimed_for(&self, provider: ProviderId) -> RoutingResult<Vec<UnclaimedEntry>> {
        QueueService::new(self.env()).eligible_unclaimed(provider)
    }

    // =========================================================================
    // Periodic work
    // =========================================================================

    pub fn run_expiration_sweep(&self) -> SweepReport {
        ExpirationWorker::new(self.env(), &self.holder).run_once()
    }

    pub fn run_notifier(&self, sink: &dyn NotificationSink) -> RoutingResult<NotifierReport> {
        Notifier::new(self.env(), sink, &self.holder).run_once()
    }
}

fn provider_event_type(event_type: QueueEventType) -> RoutingResult<()> {
    match event_type {
        QueueEventType::RefillRequest | QueueEventType::TransmissionError => Ok(()),
        other => Err(RoutingError::InvalidInput(format!(
            "{} is not a provider event",
            other.as_str()
        ))),
    }
}
