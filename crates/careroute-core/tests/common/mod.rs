//! Shared setup: one pathway ("acne") in CA, a coordinator and two eligible
//! doctors, driven by a manual clock.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use careroute_core::models::Provider;
use careroute_core::{
    CareRole, CaseId, Clock, Database, Engine, Env, ManualClock, NotificationSink, NotifyError,
    PatientId, ProviderId, RoutingConfig,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap()
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ProviderId, CaseId)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<(ProviderId, CaseId)> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify_provider(&self, provider: &Provider, case_id: CaseId) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((provider.id, case_id));
        Ok(())
    }
}

pub struct Clinic {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub cc: ProviderId,
    pub d1: ProviderId,
    pub d2: ProviderId,
    pub patient: PatientId,
}

impl Clinic {
    pub fn new() -> Self {
        Self::with_db(Database::open_in_memory().unwrap())
    }

    /// Seed the directory into `db` and build an engine over it.
    pub fn with_db(db: Database) -> Self {
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

        let clock = Arc::new(ManualClock::new(now));
        let sink = Arc::new(RecordingSink::default());
        let config = RoutingConfig {
            primary_cc_id: Some(cc),
            ..RoutingConfig::default()
        };
        let engine = Engine::new(db, config, clock.clone())
            .unwrap()
            .with_notification_sink(sink.clone());

        Self {
            engine,
            clock,
            sink,
            cc,
            d1,
            d2,
            patient,
        }
    }

    pub fn at(&self, minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    pub fn set_minutes(&self, minutes: i64) {
        self.clock.set(self.at(minutes));
    }

    pub fn new_patient(&self) -> PatientId {
        self.engine
            .db()
            .insert_patient("CA", self.clock.now())
            .unwrap()
            .id
    }

    /// Environment for driving services directly.
    pub fn env(&self) -> Env<'_> {
        Env::new(self.engine.db(), self.engine.config(), self.clock.as_ref())
    }

    pub fn count(&self, sql: &str) -> i64 {
        self.engine
            .db()
            .conn()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }
}
