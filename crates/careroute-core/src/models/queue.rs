//! Provider queue and unclaimed queue models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CareProvidingStateId, CaseId, ProviderId, QueueItemId, UnknownLabel, Visit};

/// Kind of work a queue item refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueEventType {
    /// reference = visit id
    PatientVisit,
    /// reference = treatment plan id
    TreatmentPlan,
    /// reference = case id
    CaseMessage,
    /// reference = case id
    CaseAssignment,
    /// reference = refill request id
    RefillRequest,
    /// reference = prescription id
    TransmissionError,
}

impl QueueEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventType::PatientVisit => "PATIENT_VISIT",
            QueueEventType::TreatmentPlan => "TREATMENT_PLAN",
            QueueEventType::CaseMessage => "CASE_MESSAGE",
            QueueEventType::CaseAssignment => "CASE_ASSIGNMENT",
            QueueEventType::RefillRequest => "REFILL_REQUEST",
            QueueEventType::TransmissionError => "TRANSMISSION_ERROR",
        }
    }
}

impl FromStr for QueueEventType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PATIENT_VISIT" => Ok(QueueEventType::PatientVisit),
            "TREATMENT_PLAN" => Ok(QueueEventType::TreatmentPlan),
            "CASE_MESSAGE" => Ok(QueueEventType::CaseMessage),
            "CASE_ASSIGNMENT" => Ok(QueueEventType::CaseAssignment),
            "REFILL_REQUEST" => Ok(QueueEventType::RefillRequest),
            "TRANSMISSION_ERROR" => Ok(QueueEventType::TransmissionError),
            _ => Err(UnknownLabel::new("queue event type", s)),
        }
    }
}

/// Queue item status. PENDING and ONGOING are open; the rest are history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueItemStatus {
    Pending,
    Ongoing,
    Triaged,
    Completed,
    Removed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "PENDING",
            QueueItemStatus::Ongoing => "ONGOING",
            QueueItemStatus::Triaged => "TRIAGED",
            QueueItemStatus::Completed => "COMPLETED",
            QueueItemStatus::Removed => "REMOVED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, QueueItemStatus::Pending | QueueItemStatus::Ongoing)
    }
}

impl FromStr for QueueItemStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(QueueItemStatus::Pending),
            "ONGOING" => Ok(QueueItemStatus::Ongoing),
            "TRIAGED" => Ok(QueueItemStatus::Triaged),
            "COMPLETED" => Ok(QueueItemStatus::Completed),
            "REMOVED" => Ok(QueueItemStatus::Removed),
            _ => Err(UnknownLabel::new("queue item status", s)),
        }
    }
}

/// How an open item leaves the pending tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    Triaged,
}

impl From<Completion> for QueueItemStatus {
    fn from(c: Completion) -> Self {
        match c {
            Completion::Completed => QueueItemStatus::Completed,
            Completion::Triaged => QueueItemStatus::Triaged,
        }
    }
}

/// Payload for enqueueing work into a provider queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEvent {
    pub event_type: QueueEventType,
    pub reference_id: i64,
    pub case_id: Option<CaseId>,
    pub short_description: String,
    pub long_description: String,
    pub tags: Vec<String>,
}

impl QueueEvent {
    pub fn new(event_type: QueueEventType, reference_id: i64) -> Self {
        Self {
            event_type,
            reference_id,
            case_id: None,
            short_description: String::new(),
            long_description: String::new(),
            tags: Vec::new(),
        }
    }

    /// Submitted visit awaiting review.
    pub fn patient_visit(visit: &Visit, medicine_branch: &str) -> Self {
        let label = if visit.is_followup {
            "Follow-up visit"
        } else {
            "New visit"
        };
        Self {
            event_type: QueueEventType::PatientVisit,
            reference_id: visit.id.get(),
            case_id: Some(visit.case_id),
            short_description: label.to_string(),
            long_description: format!("{} submitted for case {}", label, visit.case_id),
            tags: vec![medicine_branch.to_string()],
        }
    }

    /// Case assigned from one care-team member to another.
    pub fn case_assignment(case_id: CaseId, medicine_branch: &str, message: &str) -> Self {
        Self {
            event_type: QueueEventType::CaseAssignment,
            reference_id: case_id.get(),
            case_id: Some(case_id),
            short_description: "Case assigned".to_string(),
            long_description: message.to_string(),
            tags: vec![medicine_branch.to_string()],
        }
    }

    /// New patient message on a case.
    pub fn case_message(case_id: CaseId, medicine_branch: &str) -> Self {
        Self {
            event_type: QueueEventType::CaseMessage,
            reference_id: case_id.get(),
            case_id: Some(case_id),
            short_description: "New message".to_string(),
            long_description: format!("Patient sent a message on case {}", case_id),
            tags: vec![medicine_branch.to_string()],
        }
    }

    pub fn with_descriptions(mut self, short: impl Into<String>, long: impl Into<String>) -> Self {
        self.short_description = short.into();
        self.long_description = long.into();
        self
    }

    pub fn with_case(mut self, case_id: CaseId) -> Self {
        self.case_id = Some(case_id);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A row in a provider's queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderQueueItem {
    pub id: QueueItemId,
    pub provider_id: ProviderId,
    pub event_type: QueueEventType,
    pub reference_id: i64,
    pub case_id: Option<CaseId>,
    pub status: QueueItemStatus,
    pub short_description: String,
    pub long_description: String,
    pub tags: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Temporary hold on an unclaimed entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TempHold {
    pub provider: ProviderId,
    pub expires_at: DateTime<Utc>,
}

/// Case waiting in the global unclaimed queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnclaimedEntry {
    pub id: i64,
    pub case_id: CaseId,
    pub care_providing_state_id: CareProvidingStateId,
    /// Two-letter state abbreviation
    pub state: String,
    pub pathway_tag: String,
    pub enqueued_at: DateTime<Utc>,
    /// Present while a provider temp-claims the case
    pub hold: Option<TempHold>,
}

impl UnclaimedEntry {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.hold.map(|h| h.expires_at)
    }
}
