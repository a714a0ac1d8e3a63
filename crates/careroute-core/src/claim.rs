//! Temporary-claim state machine.
//!
//! ```text
//! UNCLAIMED ──acquire_temp──▶ TEMP_CLAIMED(provider, expires_at) ──promote──▶ PERMANENT(provider)
//!     ▲                              │
//!     └──────────revoke──────────────┘   (now > expires_at + grace)
//! ```
//!
//! A claim is a DOCTOR row in the care team. The store's partial unique
//! index on live (case, role) rows decides races between acquirers.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::context::Env;
use crate::error::{codes, RoutingError, RoutingResult};
use crate::models::{
    AssignmentStatus, CareRole, CareTeamAssignment, CaseId, ClaimState, NoteTag,
    PromotionReason, ProviderId, TempHold,
};
use crate::queue::QueueService;

/// A temporary claim taken away for inactivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub case_id: CaseId,
    pub provider_id: ProviderId,
    pub expired_at: DateTime<Utc>,
}

/// Owns acquisition, extension, promotion and revocation of claims.
pub struct ClaimManager<'a> {
    env: Env<'a>,
}

impl<'a> ClaimManager<'a> {
    pub fn new(env: Env<'a>) -> Self {
        Self { env }
    }

    /// Past expiry plus grace: behaves as revoked.
    fn is_lapsed(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now > expires_at + self.env.config.grace_period
    }

    fn live_doctor(&self, case_id: CaseId) -> RoutingResult<Option<CareTeamAssignment>> {
        Ok(self.env.db.live_assignment(case_id, CareRole::Doctor)?)
    }

    /// Current holder of the case, if any.
    pub fn claimed_by(&self, case_id: CaseId) -> RoutingResult<ClaimState> {
        self.env.db.require_case(case_id)?;
        let live = self.live_doctor(case_id)?;
        Ok(ClaimState::from_assignment(live.as_ref()))
    }

    /// Take a temporary claim.
    ///
    /// The unclaimed entry stays in place so peers still see the case. A
    /// repeat call by the holder extends; a lapsed claim by anyone is revoked
    /// first.
    pub fn acquire_temp(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        self.env.atomic(|| {
            let now = self.env.now();
            let case = self.env.db.require_case(case_id)?;
            if !case.status.is_routable() {
                return Err(RoutingError::InvalidInput(format!(
                    "case {} is {} and cannot be claimed",
                    case_id,
                    case.status.as_str()
                )));
            }

            if let Some(live) = self.live_doctor(case_id)? {
                match live.status {
                    AssignmentStatus::Active if live.provider_id == provider => {
                        return Ok(ClaimState::Permanent { provider });
                    }
                    AssignmentStatus::Temp { expires_at } if self.is_lapsed(expires_at, now) => {
                        self.revoke_row(&live, expires_at, now)?;
                    }
                    AssignmentStatus::Temp { expires_at } if live.provider_id == provider => {
                        return self.extend_row(&live, expires_at, now);
                    }
                    _ => return Err(RoutingError::AlreadyClaimed { case_id }),
                }
            }

            if let Some(entry) = self.env.db.get_unclaimed(case_id)? {
                if !self
                    .env
                    .db
                    .is_provider_eligible(provider, entry.care_providing_state_id)?
                {
                    return Err(RoutingError::forbidden(
                        codes::NOT_CASE_PROVIDER,
                        format!(
                            "provider {} is not eligible for {} {}",
                            provider, entry.state, entry.pathway_tag
                        ),
                    ));
                }
            }

            let expires_at = now + self.env.config.expire_duration;
            self.env
                .db
                .insert_assignment(
                    case_id,
                    provider,
                    CareRole::Doctor,
                    AssignmentStatus::Temp { expires_at },
                    now,
                )
                .map_err(|e| match RoutingError::from(e) {
                    RoutingError::ConstraintViolation(_) => RoutingError::AlreadyClaimed { case_id },
                    other => other,
                })?;
            self.env.db.set_unclaimed_hold(
                case_id,
                Some(TempHold {
                    provider,
                    expires_at,
                }),
                now,
            )?;

            info!(case_id = %case_id, provider_id = %provider, expires_at = %expires_at, "temp claim acquired");
            Ok(ClaimState::TempClaimed {
                provider,
                expires_at,
            })
        })
    }

    /// Push the holder's deadline to `now + expire_duration`.
    pub fn extend(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        self.env.atomic(|| {
            let now = self.env.now();
            let live = self.live_doctor(case_id)?;
            match live {
                Some(row) if row.provider_id == provider => match row.status {
                    AssignmentStatus::Temp { expires_at } => {
                        if self.is_lapsed(expires_at, now) {
                            return Err(expired(case_id));
                        }
                        self.extend_row(&row, expires_at, now)
                    }
                    _ => Ok(ClaimState::Permanent { provider }),
                },
                Some(_) => Err(claimed_by_other(case_id)),
                None => Err(not_case_provider(case_id, provider)),
            }
        })
    }

    fn extend_row(
        &self,
        row: &CareTeamAssignment,
        current: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RoutingResult<ClaimState> {
        let target = now + self.env.config.expire_duration;
        if target - current < self.env.config.min_extension_step {
            return Ok(ClaimState::TempClaimed {
                provider: row.provider_id,
                expires_at: current,
            });
        }
        self.env
            .db
            .set_assignment_status(row.id, AssignmentStatus::Temp { expires_at: target }, now)?;
        self.env.db.set_unclaimed_hold(
            row.case_id,
            Some(TempHold {
                provider: row.provider_id,
                expires_at: target,
            }),
            now,
        )?;
        debug!(case_id = %row.case_id, provider_id = %row.provider_id, expires_at = %target, "temp claim extended");
        Ok(ClaimState::TempClaimed {
            provider: row.provider_id,
            expires_at: target,
        })
    }

    /// Make the holder's temporary claim permanent.
    ///
    /// Returns false when the provider already held the case permanently.
    pub fn promote(
        &self,
        case_id: CaseId,
        provider: ProviderId,
        reason: PromotionReason,
    ) -> RoutingResult<bool> {
        self.env.atomic(|| {
            let now = self.env.now();
            let row = match self.live_doctor(case_id)? {
                Some(row) if row.provider_id == provider => row,
                Some(_) => return Err(claimed_by_other(case_id)),
                None => return Err(not_case_provider(case_id, provider)),
            };
            match row.status {
                AssignmentStatus::Active => return Ok(false),
                AssignmentStatus::Temp { expires_at } if self.is_lapsed(expires_at, now) => {
                    return Err(expired(case_id));
                }
                _ => {}
            }

            self.env
                .db
                .set_assignment_status(row.id, AssignmentStatus::Active, now)?;
            QueueService::new(self.env).dequeue_unclaimed(case_id)?;
            self.env.db.mark_case_claimed(case_id, now)?;
            self.env.db.insert_note(
                case_id,
                Some(provider),
                NoteTag::ClaimPromoted(reason),
                &format!("Claim made permanent: {}", reason.as_str()),
                now,
            )?;

            info!(case_id = %case_id, provider_id = %provider, reason = reason.as_str(), "claim promoted");
            Ok(true)
        })
    }

    /// Revoke a temporary claim that lapsed past its grace period.
    ///
    /// The case stays unclaimed and its unclaimed entry stays queued.
    pub fn revoke(&self, case_id: CaseId) -> RoutingResult<Option<Revocation>> {
        self.env.atomic(|| {
            let now = self.env.now();
            match self.live_doctor(case_id)? {
                Some(row) => match row.status {
                    AssignmentStatus::Temp { expires_at } if self.is_lapsed(expires_at, now) => {
                        self.revoke_row(&row, expires_at, now).map(Some)
                    }
                    _ => Ok(None),
                },
                None => Ok(None),
            }
        })
    }

    fn revoke_row(
        &self,
        row: &CareTeamAssignment,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RoutingResult<Revocation> {
        self.env
            .db
            .set_assignment_status(row.id, AssignmentStatus::Inactive, now)?;
        self.env.db.set_unclaimed_hold(row.case_id, None, now)?;
        self.env.db.insert_note(
            row.case_id,
            None,
            NoteTag::ClaimRevoked,
            &format!(
                "Temporary claim by provider {} expired at {}",
                row.provider_id, expires_at
            ),
            now,
        )?;
        info!(
            target: "careroute::revocation",
            case_id = %row.case_id,
            provider_id = %row.provider_id,
            expired_at = %expires_at,
            "temp claim revoked"
        );
        Ok(Revocation {
            case_id: row.case_id,
            provider_id: row.provider_id,
            expired_at: expires_at,
        })
    }

    /// Gate for commit actions: the caller must hold the case, temporarily
    /// (not lapsed) or permanently.
    pub fn authorize(&self, case_id: CaseId, provider: ProviderId) -> RoutingResult<ClaimState> {
        self.env.db.require_case(case_id)?;
        let now = self.env.now();
        match self.live_doctor(case_id)? {
            Some(row) if row.provider_id == provider => match row.status {
                AssignmentStatus::Temp { expires_at } if self.is_lapsed(expires_at, now) => {
                    Err(expired(case_id))
                }
                _ => Ok(ClaimState::from_assignment(Some(&row))),
            },
            Some(_) => Err(claimed_by_other(case_id)),
            None => Err(not_case_provider(case_id, provider)),
        }
    }
}

fn claimed_by_other(case_id: CaseId) -> RoutingError {
    RoutingError::forbidden(
        codes::CASE_CLAIMED_BY_OTHER_PROVIDER,
        format!("case {} is being handled by another provider", case_id),
    )
}

fn expired(case_id: CaseId) -> RoutingError {
    RoutingError::forbidden(
        codes::CLAIM_EXPIRED,
        format!("temporary claim on case {} has expired", case_id),
    )
}

fn not_case_provider(case_id: CaseId, provider: ProviderId) -> RoutingError {
    RoutingError::forbidden(
        codes::NOT_CASE_PROVIDER,
        format!("provider {} does not hold case {}", provider, case_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::Fixture;

    #[test]
    fn test_acquire_leaves_case_queued_and_unclaimed() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());

        let state = claims.acquire_temp(case, f.d1).unwrap();
        assert_eq!(
            state,
            ClaimState::TempClaimed {
                provider: f.d1,
                expires_at: f.at(60)
            }
        );

        let entry = f.db.get_unclaimed(case).unwrap().unwrap();
        assert_eq!(entry.hold.map(|h| h.provider), Some(f.d1));
        assert!(!f.db.require_case(case).unwrap().claimed);
    }

    #[test]
    fn test_second_acquirer_already_claimed() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        let err = claims.acquire_temp(case, f.d2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);
    }

    #[test]
    fn test_reacquire_by_holder_is_bounded_extend() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        // Within the minimum step nothing moves
        f.clock.advance(chrono::Duration::seconds(20));
        let again = claims.acquire_temp(case, f.d1).unwrap();
        assert_eq!(
            again,
            ClaimState::TempClaimed {
                provider: f.d1,
                expires_at: f.at(60)
            }
        );
    }

    #[test]
    fn test_extend_moves_deadline() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        f.set_minutes(30);
        let state = claims.extend(case, f.d1).unwrap();
        assert_eq!(
            state,
            ClaimState::TempClaimed {
                provider: f.d1,
                expires_at: f.at(90)
            }
        );
        let err = claims.extend(case, f.d2).unwrap_err();
        assert_eq!(err.code(), Some(codes::CASE_CLAIMED_BY_OTHER_PROVIDER));
    }

    #[test]
    fn test_promote_is_idempotent() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        assert!(claims
            .promote(case, f.d1, PromotionReason::TreatmentPlanSubmitted)
            .unwrap());
        assert!(!claims
            .promote(case, f.d1, PromotionReason::TreatmentPlanSubmitted)
            .unwrap());

        assert!(f.db.require_case(case).unwrap().claimed);
        assert!(f.db.get_unclaimed(case).unwrap().is_none());
        let promoted_notes = f
            .db
            .notes_for_case(case)
            .unwrap()
            .into_iter()
            .filter(|n| matches!(n.tag, NoteTag::ClaimPromoted(_)))
            .count();
        assert_eq!(promoted_notes, 1);
        assert_eq!(
            claims.claimed_by(case).unwrap(),
            ClaimState::Permanent { provider: f.d1 }
        );
    }

    #[test]
    fn test_revoke_only_after_grace() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        // Between expiry and expiry + grace the claim still counts
        f.set_minutes(70);
        assert_eq!(claims.revoke(case).unwrap(), None);
        assert!(claims.authorize(case, f.d1).is_ok());

        f.set_minutes(76);
        let revocation = claims.revoke(case).unwrap().unwrap();
        assert_eq!(revocation.provider_id, f.d1);
        assert_eq!(claims.claimed_by(case).unwrap(), ClaimState::Unclaimed);
        assert!(f.db.get_unclaimed(case).unwrap().unwrap().hold.is_none());
    }

    #[test]
    fn test_lapsed_claim_cannot_promote() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        f.set_minutes(80);
        let err = claims
            .promote(case, f.d1, PromotionReason::TreatmentPlanSubmitted)
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::CLAIM_EXPIRED));
    }

    #[test]
    fn test_peer_takes_over_lapsed_claim() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        claims.acquire_temp(case, f.d1).unwrap();

        f.set_minutes(80);
        let state = claims.acquire_temp(case, f.d2).unwrap();
        assert_eq!(state.holder(), Some(f.d2));
        let statuses: Vec<_> = f
            .db
            .assignments_for_case(case)
            .unwrap()
            .into_iter()
            .map(|a| (a.provider_id, a.status.label()))
            .collect();
        assert_eq!(statuses, vec![(f.d1, "INACTIVE"), (f.d2, "TEMP")]);
    }

    #[test]
    fn test_ineligible_provider_cannot_acquire() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());
        f.db.set_provider_unavailable(f.ca.id, f.d2, true, f.at(0))
            .unwrap();

        let err = claims.acquire_temp(case, f.d2).unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_CASE_PROVIDER));
    }

    #[test]
    fn test_authorize_foreign_doctor_forbidden() {
        let f = Fixture::new();
        let case = f.unclaimed_case();
        let claims = ClaimManager::new(f.env());

        let err = claims.authorize(case, f.d1).unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_CASE_PROVIDER));

        claims.acquire_temp(case, f.d1).unwrap();
        let err = claims.authorize(case, f.d2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.code(), Some(codes::CASE_CLAIMED_BY_OTHER_PROVIDER));
    }
}
