//! Care-team assignment and claim models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, CaseId, ProviderId, UnknownLabel};

/// Role a provider plays on a case.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CareRole {
    Doctor,
    /// Clinical coordinator
    Coordinator,
}

impl CareRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CareRole::Doctor => "DOCTOR",
            CareRole::Coordinator => "CC",
        }
    }
}

impl FromStr for CareRole {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOCTOR" => Ok(CareRole::Doctor),
            "CC" => Ok(CareRole::Coordinator),
            _ => Err(UnknownLabel::new("care role", s)),
        }
    }
}

/// Assignment status. A temporary assignment always carries its expiry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    Temp { expires_at: DateTime<Utc> },
    Active,
    Inactive,
}

impl AssignmentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AssignmentStatus::Temp { .. } => "TEMP",
            AssignmentStatus::Active => "ACTIVE",
            AssignmentStatus::Inactive => "INACTIVE",
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AssignmentStatus::Temp { expires_at } => Some(*expires_at),
            _ => None,
        }
    }

    /// TEMP or ACTIVE.
    pub fn is_live(&self) -> bool {
        !matches!(self, AssignmentStatus::Inactive)
    }

    /// Rebuild from the stored label and nullable expiry column.
    pub fn from_parts(
        label: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, UnknownLabel> {
        match (label, expires_at) {
            ("TEMP", Some(expires_at)) => Ok(AssignmentStatus::Temp { expires_at }),
            ("ACTIVE", None) => Ok(AssignmentStatus::Active),
            ("INACTIVE", None) => Ok(AssignmentStatus::Inactive),
            _ => Err(UnknownLabel::new("assignment status", label)),
        }
    }
}

/// A provider attached to a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareTeamAssignment {
    pub id: AssignmentId,
    pub case_id: CaseId,
    pub provider_id: ProviderId,
    pub role: CareRole,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who holds a case, if anyone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimState {
    Unclaimed,
    TempClaimed {
        provider: ProviderId,
        expires_at: DateTime<Utc>,
    },
    Permanent {
        provider: ProviderId,
    },
}

impl ClaimState {
    pub fn holder(&self) -> Option<ProviderId> {
        match self {
            ClaimState::Unclaimed => None,
            ClaimState::TempClaimed { provider, .. } | ClaimState::Permanent { provider } => {
                Some(*provider)
            }
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, ClaimState::Permanent { .. })
    }

    pub(crate) fn from_assignment(assignment: Option<&CareTeamAssignment>) -> Self {
        match assignment.map(|a| (a.provider_id, a.status)) {
            Some((provider, AssignmentStatus::Temp { expires_at })) => {
                ClaimState::TempClaimed {
                    provider,
                    expires_at,
                }
            }
            Some((provider, AssignmentStatus::Active)) => ClaimState::Permanent { provider },
            _ => ClaimState::Unclaimed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_temp_requires_expiry() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(AssignmentStatus::from_parts("TEMP", None).is_err());
        assert!(AssignmentStatus::from_parts("ACTIVE", Some(at)).is_err());
        assert_eq!(
            AssignmentStatus::from_parts("TEMP", Some(at)).unwrap(),
            AssignmentStatus::Temp { expires_at: at }
        );
    }

    #[test]
    fn test_claim_state_holder() {
        assert_eq!(ClaimState::Unclaimed.holder(), None);
        assert_eq!(
            ClaimState::Permanent {
                provider: ProviderId(4)
            }
            .holder(),
            Some(ProviderId(4))
        );
    }
}
