//! Careroute Core Library
//!
//! Case routing and claim engine for a telehealth practice: decides which
//! doctor reviews a submitted patient visit, guards temporary claims with
//! expiry, and keeps per-provider work queues.
//!
//! # Architecture
//!
//! ```text
//! submit visit ──▶ Router ──┬─ care continuity ───┐
//!                           ├─ care-team history ─┼──▶ doctor pending queue
//!                           ├─ designated doctor ─┘
//!                           └─ unclaimed queue ──▶ Notifier ──▶ one eligible doctor
//!                                    │
//!                               acquire_temp
//!                                    │
//!                        TEMP_CLAIMED (expires_at) ──expire+grace──▶ Expiration Worker
//!                                    │                                  (revoke)
//!                       treatment plan / unsuitable /
//!                       message / assign to coordinator
//!                                    │
//!                               PERMANENT doctor
//! ```
//!
//! # Core Principle
//!
//! **Every invariant lives in the store.** Uniqueness of live claims, one
//! open queue item per (provider, event, reference) and monotonic case state
//! are SQLite constraints, so any number of processes can share one file.
//!
//! # Modules
//!
//! - [`db`]: SQLite state store and case repository
//! - [`models`]: Domain types (PatientCase, ClaimState, QueueEvent, etc.)
//! - [`claim`]: Temporary-claim state machine
//! - [`router`]: Admission policy for submitted visits
//! - [`notifier`]: Unclaimed-work alerts with quiet hours
//! - [`expiration`]: Sweep revoking stalled temporary claims
//! - [`engine`]: Inbound operations over one store

pub mod care_team;
pub mod claim;
pub mod clock;
pub mod commit;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod models;
pub mod notifier;
pub mod queue;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use claim::{ClaimManager, Revocation};
pub use clock::{Clock, Deadline, ManualClock, SystemClock};
pub use config::RoutingConfig;
pub use context::Env;
pub use db::Database;
pub use engine::{Admission, Engine};
pub use error::{ErrorKind, RoutingError, RoutingResult};
pub use expiration::{ExpirationWorker, SweepReport};
pub use models::{
    CareRole, CaseId, ClaimState, MessageAuthor, PatientId, ProviderId, ProviderQueueItem,
    QueueEventType, UnclaimedEntry,
};
pub use notifier::{Dispatch, NotificationSink, Notifier, NotifierReport, NotifyError};
pub use router::RouteDecision;

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use models::{
    CareTeamAssignment, CaseMessage, PathwayStatus, Provider, SnoozeWindow, UnknownLabel,
};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CareRouteError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already claimed: {0}")]
    AlreadyClaimed(String),

    #[error("Forbidden ({code}): {detail}")]
    Forbidden { code: String, detail: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<RoutingError> for CareRouteError {
    fn from(e: RoutingError) -> Self {
        let message = e.to_string();
        match e {
            RoutingError::Forbidden { code, message } => CareRouteError::Forbidden {
                code: code.to_string(),
                detail: message,
            },
            other => match other.kind() {
                ErrorKind::NotFound => CareRouteError::NotFound(message),
                ErrorKind::AlreadyClaimed => CareRouteError::AlreadyClaimed(message),
                ErrorKind::Forbidden => CareRouteError::Forbidden {
                    code: String::new(),
                    detail: message,
                },
                ErrorKind::ConstraintViolation => CareRouteError::ConstraintViolation(message),
                ErrorKind::Conflict => CareRouteError::Conflict(message),
                ErrorKind::Transient => CareRouteError::Transient(message),
                ErrorKind::InvalidInput => CareRouteError::InvalidInput(message),
            },
        }
    }
}

impl From<db::DbError> for CareRouteError {
    fn from(e: db::DbError) -> Self {
        RoutingError::from(e).into()
    }
}

impl From<UnknownLabel> for CareRouteError {
    fn from(e: UnknownLabel) -> Self {
        CareRouteError::InvalidInput(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for CareRouteError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        CareRouteError::Transient(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Default engine configuration.
#[uniffi::export]
pub fn default_routing_config() -> FfiRoutingConfig {
    RoutingConfig::default().into()
}

/// Open or create a store at the given path.
#[uniffi::export]
pub fn open_engine(
    path: String,
    config: FfiRoutingConfig,
) -> Result<Arc<CareRouteCore>, CareRouteError> {
    let db = Database::open(&path)?;
    CareRouteCore::build(db, config)
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_engine_in_memory(
    config: FfiRoutingConfig,
) -> Result<Arc<CareRouteCore>, CareRouteError> {
    let db = Database::open_in_memory()?;
    CareRouteCore::build(db, config)
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct CareRouteCore {
    engine: Mutex<Engine>,
}

impl CareRouteCore {
    fn build(db: Database, config: FfiRoutingConfig) -> Result<Arc<Self>, CareRouteError> {
        let engine = Engine::new(db, config.into(), Arc::new(SystemClock))?;
        Ok(Arc::new(Self {
            engine: Mutex::new(engine),
        }))
    }
}

#[uniffi::export]
impl CareRouteCore {
    // =========================================================================
    // Directory
    // =========================================================================

    /// Create a pathway; returns its id.
    pub fn create_pathway(
        &self,
        tag: String,
        name: String,
        medicine_branch: String,
    ) -> Result<i64, CareRouteError> {
        let engine = self.engine.lock()?;
        let now = engine.env().now();
        let pathway = engine
            .db()
            .insert_pathway(&tag, &name, &medicine_branch, now)?;
        Ok(pathway.id.get())
    }

    /// Retire or reactivate a pathway ("ACTIVE" / "RETIRED").
    pub fn set_pathway_status(&self, tag: String, status: String) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        let status: PathwayStatus = status.parse()?;
        let pathway = engine
            .db()
            .pathway_by_tag(&tag)?
            .ok_or_else(|| CareRouteError::NotFound(format!("pathway {}", tag)))?;
        engine
            .db()
            .set_pathway_status(pathway.id, status, engine.env().now())?;
        Ok(())
    }

    /// Create a provider ("DOCTOR" / "CC"); returns its id.
    pub fn create_provider(
        &self,
        role: String,
        display_name: String,
        timezone: Option<String>,
    ) -> Result<i64, CareRouteError> {
        let engine = self.engine.lock()?;
        let role: CareRole = role.parse()?;
        let provider = engine.db().insert_provider(
            role,
            &display_name,
            timezone.as_deref(),
            engine.env().now(),
        )?;
        Ok(provider.id.get())
    }

    /// Create a patient living in a two-letter state; returns its id.
    pub fn create_patient(&self, state: String) -> Result<i64, CareRouteError> {
        let engine = self.engine.lock()?;
        let patient = engine.db().insert_patient(&state, engine.env().now())?;
        Ok(patient.id.get())
    }

    pub fn set_patient_state(&self, patient_id: i64, state: String) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        engine
            .db()
            .set_patient_state(PatientId(patient_id), &state, engine.env().now())?;
        Ok(())
    }

    /// Let a doctor practice a pathway in a state.
    pub fn add_eligibility(
        &self,
        state: String,
        pathway_tag: String,
        provider_id: i64,
        notify: bool,
    ) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        let env = engine.env();
        env.atomic(|| {
            let now = env.now();
            let pathway = engine
                .db()
                .pathway_by_tag(&pathway_tag)?
                .ok_or_else(|| RoutingError::NotFound(format!("pathway {}", pathway_tag)))?;
            let cps = engine
                .db()
                .ensure_care_providing_state(&state, pathway.id, now)?;
            engine
                .db()
                .insert_eligibility(cps.id, ProviderId(provider_id), notify, now)?;
            Ok(())
        })?;
        Ok(())
    }

    /// Mark a doctor temporarily unavailable for a (state, pathway).
    pub fn set_provider_unavailable(
        &self,
        state: String,
        pathway_tag: String,
        provider_id: i64,
        unavailable: bool,
    ) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        let cps = engine
            .db()
            .care_providing_state(&state, &pathway_tag)?
            .ok_or_else(|| {
                CareRouteError::NotFound(format!("care providing state {} {}", state, pathway_tag))
            })?;
        engine.db().set_provider_unavailable(
            cps.id,
            ProviderId(provider_id),
            unavailable,
            engine.env().now(),
        )?;
        Ok(())
    }

    /// Add a daily quiet-hours window in the provider's local time.
    pub fn add_snooze(
        &self,
        provider_id: i64,
        start_hour: u32,
        num_hours: u32,
    ) -> Result<(), CareRouteError> {
        if start_hour > 23 || num_hours > 24 {
            return Err(CareRouteError::InvalidInput(format!(
                "invalid snooze window {}+{}",
                start_hour, num_hours
            )));
        }
        let engine = self.engine.lock()?;
        engine.db().insert_snooze(
            ProviderId(provider_id),
            SnoozeWindow::new(start_hour, num_hours),
            engine.env().now(),
        )?;
        Ok(())
    }

    // =========================================================================
    // Admission
    // =========================================================================

    pub fn submit_visit(
        &self,
        patient_id: i64,
        pathway_tag: String,
        designated_provider_id: Option<i64>,
    ) -> Result<FfiAdmission, CareRouteError> {
        let engine = self.engine.lock()?;
        let admission = engine.submit_visit(
            PatientId(patient_id),
            &pathway_tag,
            designated_provider_id.map(ProviderId),
        )?;
        Ok(admission.into())
    }

    pub fn create_followup_visit(&self, case_id: i64) -> Result<FfiAdmission, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine.create_followup_visit(CaseId(case_id))?.into())
    }

    // =========================================================================
    // Claims
    // =========================================================================

    pub fn start_review(
        &self,
        case_id: i64,
        provider_id: i64,
    ) -> Result<FfiClaimState, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine
            .start_review(CaseId(case_id), ProviderId(provider_id))?
            .into())
    }

    pub fn claim_case(&self, case_id: i64, provider_id: i64) -> Result<FfiClaimState, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine
            .claim_case(CaseId(case_id), ProviderId(provider_id))?
            .into())
    }

    pub fn claim_state(&self, case_id: i64) -> Result<FfiClaimState, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine.claim_state(CaseId(case_id))?.into())
    }

    // =========================================================================
    // Commit actions
    // =========================================================================

    pub fn submit_treatment_plan(&self, case_id: i64, provider_id: i64) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        engine.submit_treatment_plan(CaseId(case_id), ProviderId(provider_id))?;
        Ok(())
    }

    pub fn mark_unsuitable(
        &self,
        case_id: i64,
        provider_id: i64,
        reason: String,
    ) -> Result<(), CareRouteError> {
        let engine = self.engine.lock()?;
        engine.mark_unsuitable(CaseId(case_id), ProviderId(provider_id), &reason)?;
        Ok(())
    }

    pub fn save_diagnosis(
        &self,
        case_id: i64,
        provider_id: i64,
    ) -> Result<FfiClaimState, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine
            .save_diagnosis(CaseId(case_id), ProviderId(provider_id))?
            .into())
    }

    // =========================================================================
    // Messages and assignment
    // =========================================================================

    pub fn post_patient_message(
        &self,
        case_id: i64,
        patient_id: i64,
        body: String,
    ) -> Result<FfiCaseMessage, CareRouteError> {
        let engine = self.engine.lock()?;
        let message = engine.post_case_message(
            CaseId(case_id),
            MessageAuthor::Patient(PatientId(patient_id)),
            &body,
        )?;
        Ok(message.into())
    }

    pub fn post_provider_message(
        &self,
        case_id: i64,
        provider_id: i64,
        body: String,
    ) -> Result<FfiCaseMessage, CareRouteError> {
        let engine = self.engine.lock()?;
        let message = engine.post_case_message(
            CaseId(case_id),
            MessageAuthor::Provider(ProviderId(provider_id)),
            &body,
        )?;
        Ok(message.into())
    }

    pub fn view_case_messages(
        &self,
        case_id: i64,
        viewer_id: i64,
    ) -> Result<Vec<FfiCaseMessage>, CareRouteError> {
        let engine = self.engine.lock()?;
        let messages = engine.view_case_messages(CaseId(case_id), ProviderId(viewer_id))?;
        Ok(messages.into_iter().map(|m| m.into()).collect())
    }

    /// Hand a case to its "DOCTOR" or "CC".
    pub fn assign_case(
        &self,
        case_id: i64,
        author_id: i64,
        target_role: String,
        message: String,
    ) -> Result<FfiQueueItem, CareRouteError> {
        let engine = self.engine.lock()?;
        let role: CareRole = target_role.parse()?;
        let item = engine.assign_case(CaseId(case_id), ProviderId(author_id), role, &message)?;
        Ok(item.into())
    }

    pub fn change_provider(
        &self,
        case_id: i64,
        new_provider_id: i64,
        author_id: i64,
    ) -> Result<FfiCareTeamMember, CareRouteError> {
        let engine = self.engine.lock()?;
        let row = engine.change_provider(
            CaseId(case_id),
            ProviderId(new_provider_id),
            ProviderId(author_id),
        )?;
        Ok(row.into())
    }

    pub fn care_team(
        &self,
        case_id: i64,
        include_inactive: bool,
    ) -> Result<Vec<FfiCareTeamMember>, CareRouteError> {
        let engine = self.engine.lock()?;
        let rows = engine.care_team(CaseId(case_id), include_inactive)?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Queues
    // =========================================================================

    /// Queue a "REFILL_REQUEST" or "TRANSMISSION_ERROR" for a doctor.
    pub fn enqueue_provider_event(
        &self,
        provider_id: i64,
        event_type: String,
        reference_id: i64,
        case_id: Option<i64>,
        short_description: String,
        long_description: String,
    ) -> Result<FfiQueueItem, CareRouteError> {
        let engine = self.engine.lock()?;
        let event_type: QueueEventType = event_type.parse()?;
        let item = engine.enqueue_provider_event(
            ProviderId(provider_id),
            event_type,
            reference_id,
            case_id.map(CaseId),
            &short_description,
            &long_description,
        )?;
        Ok(item.into())
    }

    pub fn resolve_provider_event(
        &self,
        provider_id: i64,
        event_type: String,
        reference_id: i64,
    ) -> Result<FfiQueueItem, CareRouteError> {
        let engine = self.engine.lock()?;
        let event_type: QueueEventType = event_type.parse()?;
        let item =
            engine.resolve_provider_event(ProviderId(provider_id), event_type, reference_id)?;
        Ok(item.into())
    }

    pub fn pending_queue(&self, provider_id: i64) -> Result<Vec<FfiQueueItem>, CareRouteError> {
        let engine = self.engine.lock()?;
        let items = engine.pending_queue(ProviderId(provider_id))?;
        Ok(items.into_iter().map(|i| i.into()).collect())
    }

    pub fn history_queue(&self, provider_id: i64) -> Result<Vec<FfiQueueItem>, CareRouteError> {
        let engine = self.engine.lock()?;
        let items = engine.history_queue(ProviderId(provider_id))?;
        Ok(items.into_iter().map(|i| i.into()).collect())
    }

    pub fn unclaimed_for(&self, provider_id: i64) -> Result<Vec<FfiUnclaimedEntry>, CareRouteError> {
        let engine = self.engine.lock()?;
        let entries = engine.unclaimed_for(ProviderId(provider_id))?;
        Ok(entries.into_iter().map(|e| e.into()).collect())
    }

    // =========================================================================
    // Periodic work
    // =========================================================================

    pub fn run_expiration_sweep(&self) -> Result<FfiSweepReport, CareRouteError> {
        let engine = self.engine.lock()?;
        Ok(engine.run_expiration_sweep().into())
    }

    /// One notifier pass. The host delivers each returned dispatch.
    pub fn run_notifier(&self) -> Result<FfiNotifierReport, CareRouteError> {
        let engine = self.engine.lock()?;
        let report = engine.run_notifier(&HostSink)?;
        Ok(report.into())
    }
}

/// Accepts every dispatch; delivery happens on the host side.
struct HostSink;

impl NotificationSink for HostSink {
    fn notify_provider(&self, _provider: &Provider, _case_id: CaseId) -> Result<(), NotifyError> {
        Ok(())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

/// FFI-safe engine configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRoutingConfig {
    pub expire_minutes: u32,
    pub grace_minutes: u32,
    pub notifier_cooldown_minutes: u32,
    pub provider_cooldown_minutes: u32,
    pub unsuitable_message_public: bool,
    pub primary_cc_id: Option<i64>,
    pub expiration_shards: u32,
    pub lock_ttl_seconds: u32,
    pub request_timeout_seconds: u32,
}

impl From<RoutingConfig> for FfiRoutingConfig {
    fn from(config: RoutingConfig) -> Self {
        let clamp = |v: i64| u32::try_from(v.max(0)).unwrap_or(u32::MAX);
        Self {
            expire_minutes: clamp(config.expire_duration.num_minutes()),
            grace_minutes: clamp(config.grace_period.num_minutes()),
            notifier_cooldown_minutes: clamp(config.notifier_cooldown.num_minutes()),
            provider_cooldown_minutes: clamp(config.provider_notify_cooldown.num_minutes()),
            unsuitable_message_public: config.unsuitable_message_public,
            primary_cc_id: config.primary_cc_id.map(|id| id.get()),
            expiration_shards: config.expiration_shards,
            lock_ttl_seconds: clamp(config.lock_ttl.num_seconds()),
            request_timeout_seconds: clamp(config.request_timeout.num_seconds()),
        }
    }
}

impl From<FfiRoutingConfig> for RoutingConfig {
    fn from(config: FfiRoutingConfig) -> Self {
        RoutingConfig {
            expire_duration: Duration::minutes(config.expire_minutes.into()),
            grace_period: Duration::minutes(config.grace_minutes.into()),
            notifier_cooldown: Duration::minutes(config.notifier_cooldown_minutes.into()),
            provider_notify_cooldown: Duration::minutes(config.provider_cooldown_minutes.into()),
            unsuitable_message_public: config.unsuitable_message_public,
            primary_cc_id: config.primary_cc_id.map(ProviderId),
            expiration_shards: config.expiration_shards,
            lock_ttl: Duration::seconds(config.lock_ttl_seconds.into()),
            request_timeout: Duration::seconds(config.request_timeout_seconds.into()),
            ..RoutingConfig::default()
        }
    }
}

/// FFI-safe admission result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdmission {
    pub case_id: i64,
    pub visit_id: i64,
    /// care-continuity, care-team-history, designated-provider or unclaimed
    pub route: String,
    pub provider_id: Option<i64>,
}

impl From<Admission> for FfiAdmission {
    fn from(admission: Admission) -> Self {
        Self {
            case_id: admission.case_id.get(),
            visit_id: admission.visit_id.get(),
            route: admission.decision.label().to_string(),
            provider_id: admission.decision.provider().map(|p| p.get()),
        }
    }
}

/// FFI-safe claim state.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClaimState {
    /// UNCLAIMED, TEMP_CLAIMED or PERMANENT
    pub status: String,
    pub provider_id: Option<i64>,
    pub expires_at: Option<String>,
}

impl From<ClaimState> for FfiClaimState {
    fn from(state: ClaimState) -> Self {
        let (status, expires_at) = match state {
            ClaimState::Unclaimed => ("UNCLAIMED", None),
            ClaimState::TempClaimed { expires_at, .. } => ("TEMP_CLAIMED", Some(fmt_ts(expires_at))),
            ClaimState::Permanent { .. } => ("PERMANENT", None),
        };
        Self {
            status: status.to_string(),
            provider_id: state.holder().map(|p| p.get()),
            expires_at,
        }
    }
}

/// FFI-safe provider queue item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiQueueItem {
    pub id: i64,
    pub provider_id: i64,
    pub event_type: String,
    pub reference_id: i64,
    pub case_id: Option<i64>,
    pub status: String,
    pub short_description: String,
    pub long_description: String,
    pub tags: Vec<String>,
    pub enqueued_at: String,
    pub completed_at: Option<String>,
}

impl From<ProviderQueueItem> for FfiQueueItem {
    fn from(item: ProviderQueueItem) -> Self {
        Self {
            id: item.id.get(),
            provider_id: item.provider_id.get(),
            event_type: item.event_type.as_str().to_string(),
            reference_id: item.reference_id,
            case_id: item.case_id.map(|c| c.get()),
            status: item.status.as_str().to_string(),
            short_description: item.short_description,
            long_description: item.long_description,
            tags: item.tags,
            enqueued_at: fmt_ts(item.enqueued_at),
            completed_at: item.completed_at.map(fmt_ts),
        }
    }
}

/// FFI-safe unclaimed queue entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiUnclaimedEntry {
    pub case_id: i64,
    pub state: String,
    pub pathway_tag: String,
    pub enqueued_at: String,
    pub held_by: Option<i64>,
    pub hold_expires_at: Option<String>,
}

impl From<UnclaimedEntry> for FfiUnclaimedEntry {
    fn from(entry: UnclaimedEntry) -> Self {
        Self {
            case_id: entry.case_id.get(),
            state: entry.state,
            pathway_tag: entry.pathway_tag,
            enqueued_at: fmt_ts(entry.enqueued_at),
            held_by: entry.hold.map(|h| h.provider.get()),
            hold_expires_at: entry.hold.map(|h| fmt_ts(h.expires_at)),
        }
    }
}

/// FFI-safe case message.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCaseMessage {
    pub id: i64,
    pub case_id: i64,
    pub patient_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub body: String,
    pub private: bool,
    pub created_at: String,
}

impl From<CaseMessage> for FfiCaseMessage {
    fn from(message: CaseMessage) -> Self {
        let (patient_id, provider_id) = match message.author {
            MessageAuthor::Patient(p) => (Some(p.get()), None),
            MessageAuthor::Provider(p) => (None, Some(p.get())),
        };
        Self {
            id: message.id,
            case_id: message.case_id.get(),
            patient_id,
            provider_id,
            body: message.body,
            private: message.private,
            created_at: fmt_ts(message.created_at),
        }
    }
}

/// FFI-safe care-team row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCareTeamMember {
    pub provider_id: i64,
    pub role: String,
    pub status: String,
    pub expires_at: Option<String>,
}

impl From<CareTeamAssignment> for FfiCareTeamMember {
    fn from(row: CareTeamAssignment) -> Self {
        Self {
            provider_id: row.provider_id.get(),
            role: row.role.as_str().to_string(),
            status: row.status.label().to_string(),
            expires_at: row.status.expires_at().map(fmt_ts),
        }
    }
}

/// FFI-safe revocation.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRevocation {
    pub case_id: i64,
    pub provider_id: i64,
    pub expired_at: String,
}

/// FFI-safe sweep summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSweepReport {
    pub revoked: Vec<FfiRevocation>,
    pub shards_skipped: Vec<u32>,
    pub failures: u32,
    pub deadline_hit: bool,
}

impl From<SweepReport> for FfiSweepReport {
    fn from(report: SweepReport) -> Self {
        Self {
            revoked: report
                .revoked
                .into_iter()
                .map(|r| FfiRevocation {
                    case_id: r.case_id.get(),
                    provider_id: r.provider_id.get(),
                    expired_at: fmt_ts(r.expired_at),
                })
                .collect(),
            shards_skipped: report.shards_skipped,
            failures: u32::try_from(report.failures).unwrap_or(u32::MAX),
            deadline_hit: report.deadline_hit,
        }
    }
}

/// FFI-safe "notify provider P about case C".
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispatch {
    pub provider_id: i64,
    pub case_id: i64,
}

/// FFI-safe notifier summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiNotifierReport {
    pub dispatched: Vec<FfiDispatch>,
    pub ledgers_cleared: u32,
    pub failures: u32,
    pub deadline_hit: bool,
}

impl From<NotifierReport> for FfiNotifierReport {
    fn from(report: NotifierReport) -> Self {
        Self {
            dispatched: report
                .dispatched
                .into_iter()
                .map(|d| FfiDispatch {
                    provider_id: d.provider_id.get(),
                    case_id: d.case_id.get(),
                })
                .collect(),
            ledgers_cleared: u32::try_from(report.ledgers_cleared).unwrap_or(u32::MAX),
            failures: u32::try_from(report.failures).unwrap_or(u32::MAX),
            deadline_hit: report.deadline_hit,
        }
    }
}
