//! Shared unit-test fixture: one pathway, one state, a coordinator and two
//! eligible doctors, on a manually driven clock.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::clock::{Clock, ManualClock};
use crate::config::RoutingConfig;
use crate::context::Env;
use crate::db::Database;
use crate::models::{
    CareProvidingState, CareRole, CaseId, CaseStatus, Pathway, PatientId, ProviderId,
};

pub(crate) struct Fixture {
    pub db: Database,
    pub config: RoutingConfig,
    pub clock: ManualClock,
    pub pathway: Pathway,
    pub ca: CareProvidingState,
    pub cc: ProviderId,
    pub d1: ProviderId,
    pub d2: ProviderId,
    pub patient: PatientId,
}

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap()
}

impl Fixture {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let now = t0();
        let pathway = db
            .insert_pathway("acne", "Acne", "dermatology", now)
            .unwrap();
        let ca = db
            .ensure_care_providing_state("CA", pathway.id, now)
            .unwrap();
        let cc = db
            .insert_provider(CareRole::Coordinator, "Coordinator", None, now)
            .unwrap()
            .id;
        let d1 = db
            .insert_provider(CareRole::Doctor, "Dr. One", Some("America/Los_Angeles"), now)
            .unwrap()
            .id;
        let d2 = db
            .insert_provider(CareRole::Doctor, "Dr. Two", Some("America/Los_Angeles"), now)
            .unwrap()
            .id;
        db.insert_eligibility(ca.id, d1, true, now).unwrap();
        db.insert_eligibility(ca.id, d2, true, now).unwrap();
        let patient = db.insert_patient("CA", now).unwrap().id;

        let config = RoutingConfig {
            primary_cc_id: Some(cc),
            ..RoutingConfig::default()
        };

        Self {
            db,
            config,
            clock: ManualClock::new(now),
            pathway,
            ca,
            cc,
            d1,
            d2,
            patient,
        }
    }

    pub fn env(&self) -> Env<'_> {
        Env::new(&self.db, &self.config, &self.clock)
    }

    /// Instant `minutes` after the fixture start.
    pub fn at(&self, minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    pub fn set_minutes(&self, minutes: i64) {
        self.clock.set(self.at(minutes));
    }

    /// An ACTIVE, unclaimed case waiting in the CA unclaimed queue.
    pub fn unclaimed_case(&self) -> CaseId {
        let now = self.clock.now();
        let case = self
            .db
            .insert_case(self.patient, self.pathway.id, now)
            .unwrap();
        self.db.insert_visit(case.id, None, false, now).unwrap();
        self.db
            .update_case_status(&case, CaseStatus::Active, now)
            .unwrap();
        self.db.insert_unclaimed(case.id, self.ca.id, now).unwrap();
        case.id
    }
}
