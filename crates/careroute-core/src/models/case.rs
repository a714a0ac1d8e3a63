//! Case, visit and pathway models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CaseId, PathwayId, PatientId, ProviderId, UnknownLabel, VisitId};

/// Pathway lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PathwayStatus {
    Active,
    Retired,
}

impl PathwayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathwayStatus::Active => "ACTIVE",
            PathwayStatus::Retired => "RETIRED",
        }
    }
}

impl FromStr for PathwayStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(PathwayStatus::Active),
            "RETIRED" => Ok(PathwayStatus::Retired),
            _ => Err(UnknownLabel::new("pathway status", s)),
        }
    }
}

/// A medical specialty lane, e.g. "acne".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pathway {
    pub id: PathwayId,
    /// Stable tag, never changes once created
    pub tag: String,
    pub name: String,
    /// Branch of medicine, carried as a tag on every queue item
    pub medicine_branch: String,
    pub status: PathwayStatus,
    pub created_at: DateTime<Utc>,
}

/// Case status. Transitions are monotonic:
/// OPEN → SUBMITTED → ACTIVE → (TRIAGED | INACTIVE).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    Open,
    Submitted,
    Active,
    Triaged,
    Inactive,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "OPEN",
            CaseStatus::Submitted => "SUBMITTED",
            CaseStatus::Active => "ACTIVE",
            CaseStatus::Triaged => "TRIAGED",
            CaseStatus::Inactive => "INACTIVE",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CaseStatus::Open => 0,
            CaseStatus::Submitted => 1,
            CaseStatus::Active => 2,
            CaseStatus::Triaged | CaseStatus::Inactive => 3,
        }
    }

    /// Terminal statuses.
    pub fn is_closed(&self) -> bool {
        matches!(self, CaseStatus::Triaged | CaseStatus::Inactive)
    }

    /// Whether the unclaimed queue may hold this case.
    pub fn is_routable(&self) -> bool {
        matches!(self, CaseStatus::Submitted | CaseStatus::Active)
    }

    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_closed() && self.rank() < next.rank()
    }
}

impl FromStr for CaseStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(CaseStatus::Open),
            "SUBMITTED" => Ok(CaseStatus::Submitted),
            "ACTIVE" => Ok(CaseStatus::Active),
            "TRIAGED" => Ok(CaseStatus::Triaged),
            "INACTIVE" => Ok(CaseStatus::Inactive),
            _ => Err(UnknownLabel::new("case status", s)),
        }
    }
}

/// A patient's clinical encounter on one pathway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientCase {
    pub id: CaseId,
    pub patient_id: PatientId,
    pub pathway_id: PathwayId,
    pub status: CaseStatus,
    /// Once true, never false again
    pub claimed: bool,
    /// Optimistic concurrency version
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Visit status, independent of the case status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VisitStatus {
    Open,
    Submitted,
    Routed,
    Treated,
    Triaged,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Open => "OPEN",
            VisitStatus::Submitted => "SUBMITTED",
            VisitStatus::Routed => "ROUTED",
            VisitStatus::Treated => "TREATED",
            VisitStatus::Triaged => "TRIAGED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, VisitStatus::Treated | VisitStatus::Triaged)
    }
}

impl FromStr for VisitStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(VisitStatus::Open),
            "SUBMITTED" => Ok(VisitStatus::Submitted),
            "ROUTED" => Ok(VisitStatus::Routed),
            "TREATED" => Ok(VisitStatus::Treated),
            "TRIAGED" => Ok(VisitStatus::Triaged),
            _ => Err(UnknownLabel::new("visit status", s)),
        }
    }
}

/// One visit (initial or follow-up) within a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    pub id: VisitId,
    pub case_id: CaseId,
    pub status: VisitStatus,
    /// Provider the patient picked when starting the visit
    pub designated_provider: Option<ProviderId>,
    pub is_followup: bool,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Why a temporary claim became permanent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PromotionReason {
    TreatmentPlanSubmitted,
    MarkedUnsuitable,
    DoctorMessagedPatient,
    CaseAssigned,
}

impl PromotionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionReason::TreatmentPlanSubmitted => "treatment-plan-submitted",
            PromotionReason::MarkedUnsuitable => "marked-unsuitable",
            PromotionReason::DoctorMessagedPatient => "doctor-messaged-patient",
            PromotionReason::CaseAssigned => "case-assigned",
        }
    }
}

impl FromStr for PromotionReason {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "treatment-plan-submitted" => Ok(PromotionReason::TreatmentPlanSubmitted),
            "marked-unsuitable" => Ok(PromotionReason::MarkedUnsuitable),
            "doctor-messaged-patient" => Ok(PromotionReason::DoctorMessagedPatient),
            "case-assigned" => Ok(PromotionReason::CaseAssigned),
            _ => Err(UnknownLabel::new("promotion reason", s)),
        }
    }
}

/// Internal audit note kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NoteTag {
    ClaimPromoted(PromotionReason),
    ClaimRevoked,
    ProviderChanged,
    CaseAssigned,
    MarkedUnsuitable,
}

impl NoteTag {
    pub fn label(&self) -> String {
        match self {
            NoteTag::ClaimPromoted(reason) => format!("claim-promoted:{}", reason.as_str()),
            NoteTag::ClaimRevoked => "claim-revoked".to_string(),
            NoteTag::ProviderChanged => "provider-changed".to_string(),
            NoteTag::CaseAssigned => "case-assigned".to_string(),
            NoteTag::MarkedUnsuitable => "marked-unsuitable".to_string(),
        }
    }
}

impl FromStr for NoteTag {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(reason) = s.strip_prefix("claim-promoted:") {
            return reason
                .parse()
                .map(NoteTag::ClaimPromoted)
                .map_err(|_| UnknownLabel::new("note tag", s));
        }
        match s {
            "claim-revoked" => Ok(NoteTag::ClaimRevoked),
            "provider-changed" => Ok(NoteTag::ProviderChanged),
            "case-assigned" => Ok(NoteTag::CaseAssigned),
            "marked-unsuitable" => Ok(NoteTag::MarkedUnsuitable),
            _ => Err(UnknownLabel::new("note tag", s)),
        }
    }
}

/// Internal note attached to a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseNote {
    pub id: i64,
    pub case_id: CaseId,
    /// None for system-generated notes
    pub author_id: Option<ProviderId>,
    pub tag: NoteTag,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Who wrote a case message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageAuthor {
    Patient(PatientId),
    Provider(ProviderId),
}

/// Message in a case conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseMessage {
    pub id: i64,
    pub case_id: CaseId,
    pub author: MessageAuthor,
    pub body: String,
    /// Private messages are only visible to the care team
    pub private: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_status_monotonic() {
        assert!(CaseStatus::Open.can_transition_to(CaseStatus::Submitted));
        assert!(CaseStatus::Submitted.can_transition_to(CaseStatus::Active));
        assert!(CaseStatus::Active.can_transition_to(CaseStatus::Triaged));
        assert!(CaseStatus::Open.can_transition_to(CaseStatus::Active));
        assert!(!CaseStatus::Active.can_transition_to(CaseStatus::Submitted));
        assert!(!CaseStatus::Triaged.can_transition_to(CaseStatus::Inactive));
        assert!(CaseStatus::Triaged.can_transition_to(CaseStatus::Triaged));
    }

    #[test]
    fn test_note_tag_labels_parse_back() {
        let tags = [
            NoteTag::ClaimPromoted(PromotionReason::MarkedUnsuitable),
            NoteTag::ClaimRevoked,
            NoteTag::ProviderChanged,
            NoteTag::CaseAssigned,
        ];
        for tag in tags {
            assert_eq!(tag.label().parse::<NoteTag>().unwrap(), tag);
        }
        assert!("claim-promoted:bogus".parse::<NoteTag>().is_err());
    }
}
