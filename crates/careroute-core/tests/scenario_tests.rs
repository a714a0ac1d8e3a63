//! End-to-end routing and claim scenarios.

mod common;

use chrono::Duration;

use careroute_core::models::{AssignmentStatus, QueueEventType};
use careroute_core::notifier::NotifyOutcome;
use careroute_core::{CareRole, ClaimState, ErrorKind, MessageAuthor, RouteDecision};
use common::Clinic;

#[test]
fn test_solo_unclaimed_submission() {
    let clinic = Clinic::new();

    let admission = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap();

    let case = clinic.engine.db().require_case(admission.case_id).unwrap();
    assert_eq!(case.status.as_str(), "ACTIVE");
    assert!(!case.claimed);

    let team = clinic.engine.care_team(admission.case_id, false).unwrap();
    assert_eq!(team.len(), 1);
    assert_eq!(team[0].provider_id, clinic.cc);
    assert_eq!(team[0].role, CareRole::Coordinator);

    for doctor in [clinic.d1, clinic.d2] {
        let visible = clinic.engine.unclaimed_for(doctor).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].case_id, admission.case_id);
    }

    // Exactly one of the two doctors hears about it
    let sent = clinic.sink.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0 == clinic.d1 || sent[0].0 == clinic.d2);
    assert_eq!(sent[0].1, admission.case_id);
    assert!(matches!(
        admission.notification,
        Some(NotifyOutcome::Dispatched(_))
    ));
}

#[test]
fn test_temp_claim_extension_and_promotion() {
    let clinic = Clinic::new();
    let case = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap()
        .case_id;

    let state = clinic.engine.start_review(case, clinic.d1).unwrap();
    assert_eq!(
        state,
        ClaimState::TempClaimed {
            provider: clinic.d1,
            expires_at: clinic.at(60)
        }
    );

    clinic.set_minutes(30);
    let state = clinic.engine.save_diagnosis(case, clinic.d1).unwrap();
    assert_eq!(
        state,
        ClaimState::TempClaimed {
            provider: clinic.d1,
            expires_at: clinic.at(90)
        }
    );

    clinic.set_minutes(40);
    clinic.engine.submit_treatment_plan(case, clinic.d1).unwrap();
    assert_eq!(
        clinic.engine.claim_state(case).unwrap(),
        ClaimState::Permanent { provider: clinic.d1 }
    );
    assert!(clinic.engine.db().require_case(case).unwrap().claimed);
    assert!(clinic.engine.db().get_unclaimed(case).unwrap().is_none());

    // Foreign doctor blocked
    clinic.set_minutes(45);
    let err = clinic
        .engine
        .submit_treatment_plan(case, clinic.d2)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.code(), Some("case_claimed_by_other_provider"));
}

#[test]
fn test_expiration_returns_case_to_peers() {
    let clinic = Clinic::new();
    let case = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap()
        .case_id;
    clinic.engine.claim_case(case, clinic.d1).unwrap();

    // Held but not yet past grace
    clinic.set_minutes(75);
    assert!(clinic.engine.run_expiration_sweep().revoked.is_empty());
    let err = clinic.engine.claim_case(case, clinic.d2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyClaimed);

    clinic.clock.set(clinic.at(75) + Duration::seconds(1));
    let report = clinic.engine.run_expiration_sweep();
    assert_eq!(report.revoked.len(), 1);
    assert_eq!(report.revoked[0].case_id, case);
    assert_eq!(report.revoked[0].provider_id, clinic.d1);
    assert_eq!(clinic.engine.claim_state(case).unwrap(), ClaimState::Unclaimed);

    let entry = clinic.engine.db().get_unclaimed(case).unwrap().unwrap();
    assert!(entry.hold.is_none());

    let state = clinic.engine.claim_case(case, clinic.d2).unwrap();
    assert_eq!(state.holder(), Some(clinic.d2));

    let history = clinic.engine.care_team(case, true).unwrap();
    let d1_row = history
        .iter()
        .find(|row| row.provider_id == clinic.d1)
        .unwrap();
    assert_eq!(d1_row.status, AssignmentStatus::Inactive);
}

#[test]
fn test_care_team_history_reuse() {
    let clinic = Clinic::new();
    let first = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap()
        .case_id;
    clinic.engine.start_review(first, clinic.d1).unwrap();
    clinic.engine.submit_treatment_plan(first, clinic.d1).unwrap();
    let sent_before = clinic.sink.sent().len();

    clinic.set_minutes(60 * 24 * 90);
    let admission = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap();
    assert_ne!(admission.case_id, first);
    assert_eq!(
        admission.decision,
        RouteDecision::CareTeamHistory { provider: clinic.d1 }
    );
    assert_eq!(
        clinic.engine.claim_state(admission.case_id).unwrap(),
        ClaimState::Permanent { provider: clinic.d1 }
    );

    let pending = clinic.engine.pending_queue(clinic.d1).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, QueueEventType::PatientVisit);
    assert_eq!(pending[0].reference_id, admission.visit_id.get());

    // Unclaimed queue untouched, nobody notified
    assert!(clinic
        .engine
        .db()
        .get_unclaimed(admission.case_id)
        .unwrap()
        .is_none());
    assert!(clinic.engine.unclaimed_for(clinic.d2).unwrap().is_empty());
    assert_eq!(clinic.sink.sent().len(), sent_before);
}

#[test]
fn test_coordinator_assignment_preserves_order() {
    let clinic = Clinic::new();

    // Case owned by D1
    let owned = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap()
        .case_id;
    clinic.engine.start_review(owned, clinic.d1).unwrap();
    clinic.engine.submit_treatment_plan(owned, clinic.d1).unwrap();

    // An earlier coordinator item on another case
    let other_patient = clinic.new_patient();
    clinic.set_minutes(5);
    let other = clinic
        .engine
        .submit_visit(other_patient, "acne", None)
        .unwrap()
        .case_id;
    clinic
        .engine
        .post_case_message(other, MessageAuthor::Patient(other_patient), "Question")
        .unwrap();

    clinic.set_minutes(10);
    let first = clinic
        .engine
        .assign_case(owned, clinic.d1, CareRole::Coordinator, "please follow up")
        .unwrap();

    // Another visit lands in D1's queue
    clinic.set_minutes(20);
    let third_patient = clinic.new_patient();
    let designated = clinic
        .engine
        .submit_visit(third_patient, "acne", Some(clinic.d1))
        .unwrap();
    assert_eq!(
        designated.decision,
        RouteDecision::DesignatedProvider { provider: clinic.d1 }
    );

    // A later coordinator item
    clinic.set_minutes(25);
    clinic
        .engine
        .post_case_message(designated.case_id, MessageAuthor::Patient(third_patient), "Hi")
        .unwrap();

    clinic.set_minutes(30);
    let again = clinic
        .engine
        .assign_case(owned, clinic.d1, CareRole::Coordinator, "still waiting on labs")
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.enqueued_at, clinic.at(10));
    assert_eq!(again.long_description, "still waiting on labs");

    let cc_queue = clinic.engine.pending_queue(clinic.cc).unwrap();
    let cases: Vec<_> = cc_queue.iter().map(|i| i.case_id.unwrap()).collect();
    assert_eq!(cases, vec![other, owned, designated.case_id]);
    assert_eq!(
        cc_queue
            .iter()
            .filter(|i| i.event_type == QueueEventType::CaseAssignment)
            .count(),
        1
    );

    let d1_queue = clinic.engine.pending_queue(clinic.d1).unwrap();
    assert_eq!(d1_queue.len(), 1);
    assert_eq!(d1_queue[0].reference_id, designated.visit_id.get());
}

#[test]
fn test_mark_unsuitable_flows_to_coordinator() {
    let clinic = Clinic::new();
    let case = clinic
        .engine
        .submit_visit(clinic.patient, "acne", None)
        .unwrap()
        .case_id;
    clinic.engine.start_review(case, clinic.d1).unwrap();
    clinic
        .engine
        .mark_unsuitable(case, clinic.d1, "needs an in-person exam")
        .unwrap();

    let loaded = clinic.engine.db().require_case(case).unwrap();
    assert_eq!(loaded.status.as_str(), "TRIAGED");
    assert!(loaded.claimed);

    let cc_queue = clinic.engine.pending_queue(clinic.cc).unwrap();
    assert_eq!(cc_queue.len(), 1);
    assert_eq!(cc_queue[0].event_type, QueueEventType::CaseAssignment);

    let history = clinic.engine.history_queue(clinic.d1).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status.as_str(), "TRIAGED");

    // Closed cases take no new visits
    let err = clinic.engine.create_followup_visit(case).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
