//! Care-team assignment rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{get_label, get_opt_ts, get_ts, ts, Database, DbResult};
use crate::models::{
    AssignmentId, AssignmentStatus, CareRole, CareTeamAssignment, CaseId, PathwayId, PatientId,
    ProviderId,
};

const ASSIGNMENT_COLUMNS: &str =
    "id, case_id, provider_id, role, status, expires_at, created_at, updated_at";

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<CareTeamAssignment> {
    let label: String = row.get(4)?;
    let status = AssignmentStatus::from_parts(&label, get_opt_ts(row, 5)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(CareTeamAssignment {
        id: row.get(0)?,
        case_id: row.get(1)?,
        provider_id: row.get(2)?,
        role: get_label(row, 3)?,
        status,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

impl Database {
    /// Attach a provider to a case.
    ///
    /// A second live (TEMP or ACTIVE) row for the same (case, role) is
    /// rejected by the store with a constraint failure.
    pub fn insert_assignment(
        &self,
        case_id: CaseId,
        provider_id: ProviderId,
        role: CareRole,
        status: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> DbResult<CareTeamAssignment> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO care_team_assignment (case_id, provider_id, role, status, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                case_id,
                provider_id,
                role.as_str(),
                status.label(),
                status.expires_at().as_ref().map(ts),
                at
            ],
        )?;
        Ok(CareTeamAssignment {
            id: AssignmentId(self.conn.last_insert_rowid()),
            case_id,
            provider_id,
            role,
            status,
            created_at: now,
            updated_at: now,
        })
    }

    /// The TEMP or ACTIVE row for (case, role), if any.
    pub fn live_assignment(
        &self,
        case_id: CaseId,
        role: CareRole,
    ) -> DbResult<Option<CareTeamAssignment>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM care_team_assignment
                    WHERE case_id = ?1 AND role = ?2 AND status IN ('TEMP', 'ACTIVE')
                    "#,
                    ASSIGNMENT_COLUMNS
                ),
                params![case_id, role.as_str()],
                assignment_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Every assignment of a case, oldest first.
    pub fn assignments_for_case(&self, case_id: CaseId) -> DbResult<Vec<CareTeamAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM care_team_assignment WHERE case_id = ? ORDER BY created_at, id",
            ASSIGNMENT_COLUMNS
        ))?;
        let rows = stmt.query_map([case_id], assignment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Rewrite status and expiry of one row.
    pub fn set_assignment_status(
        &self,
        id: AssignmentId,
        status: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE care_team_assignment SET status = ?2, expires_at = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
            params![
                id,
                status.label(),
                status.expires_at().as_ref().map(ts),
                ts(&now)
            ],
        )?;
        Ok(rows > 0)
    }

    /// TEMP doctor rows whose expiry is before `cutoff`, limited to cases in
    /// `shard` of `shards`.
    pub fn temp_assignments_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        shard: u32,
        shards: u32,
    ) -> DbResult<Vec<CareTeamAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM care_team_assignment
            WHERE status = 'TEMP' AND role = 'DOCTOR' AND expires_at < ?1 AND case_id % ?3 = ?2
            ORDER BY expires_at, id
            "#,
            ASSIGNMENT_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![ts(&cutoff), i64::from(shard), i64::from(shards.max(1))],
            assignment_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Doctor who most recently held a permanent claim on another case of
    /// the patient on the same pathway.
    pub fn last_doctor_for(
        &self,
        patient_id: PatientId,
        pathway_id: PathwayId,
        excluding: CaseId,
    ) -> DbResult<Option<ProviderId>> {
        self.conn
            .query_row(
                r#"
                SELECT a.provider_id
                FROM care_team_assignment a
                JOIN patient_case c ON c.id = a.case_id
                WHERE c.patient_id = ?1 AND c.pathway_id = ?2 AND c.id <> ?3
                  AND a.role = 'DOCTOR' AND a.status = 'ACTIVE'
                ORDER BY c.created_at DESC, c.id DESC
                LIMIT 1
                "#,
                params![patient_id, pathway_id, excluding],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        db: Database,
        case: CaseId,
        doc1: ProviderId,
        doc2: ProviderId,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", now()).unwrap();
        let patient = db.insert_patient("CA", now()).unwrap();
        let case = db.insert_case(patient.id, acne.id, now()).unwrap();
        let doc1 = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, now())
            .unwrap();
        let doc2 = db
            .insert_provider(CareRole::Doctor, "Dr. Two", None, now())
            .unwrap();
        Fixture {
            db,
            case: case.id,
            doc1: doc1.id,
            doc2: doc2.id,
        }
    }

    #[test]
    fn test_temp_row_roundtrip() {
        let f = setup();
        let expires_at = now() + Duration::minutes(60);
        let row = f
            .db
            .insert_assignment(
                f.case,
                f.doc1,
                CareRole::Doctor,
                AssignmentStatus::Temp { expires_at },
                now(),
            )
            .unwrap();

        let live = f.db.live_assignment(f.case, CareRole::Doctor).unwrap().unwrap();
        assert_eq!(live, row);
        assert!(f.db.live_assignment(f.case, CareRole::Coordinator).unwrap().is_none());
    }

    #[test]
    fn test_second_live_doctor_rejected() {
        let f = setup();
        f.db.insert_assignment(f.case, f.doc1, CareRole::Doctor, AssignmentStatus::Active, now())
            .unwrap();
        let second = f.db.insert_assignment(
            f.case,
            f.doc2,
            CareRole::Doctor,
            AssignmentStatus::Temp {
                expires_at: now() + Duration::minutes(5),
            },
            now(),
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_expired_sweep_respects_shard() {
        let f = setup();
        let expires_at = now() + Duration::minutes(60);
        f.db.insert_assignment(
            f.case,
            f.doc1,
            CareRole::Doctor,
            AssignmentStatus::Temp { expires_at },
            now(),
        )
        .unwrap();

        let cutoff = expires_at + Duration::seconds(1);
        assert!(f
            .db
            .temp_assignments_expired_before(expires_at, 0, 1)
            .unwrap()
            .is_empty());
        assert_eq!(
            f.db.temp_assignments_expired_before(cutoff, 0, 1).unwrap().len(),
            1
        );

        let shard = (f.case.get() % 2) as u32;
        assert_eq!(
            f.db.temp_assignments_expired_before(cutoff, shard, 2)
                .unwrap()
                .len(),
            1
        );
        assert!(f
            .db
            .temp_assignments_expired_before(cutoff, 1 - shard, 2)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_last_doctor_prefers_latest_case() {
        let f = setup();
        let case = f.db.require_case(f.case).unwrap();
        f.db.insert_assignment(f.case, f.doc1, CareRole::Doctor, AssignmentStatus::Active, now())
            .unwrap();

        let later = now() + Duration::days(10);
        let second = f.db.insert_case(case.patient_id, case.pathway_id, later).unwrap();
        f.db.insert_assignment(second.id, f.doc2, CareRole::Doctor, AssignmentStatus::Active, later)
            .unwrap();

        let third = f
            .db
            .insert_case(case.patient_id, case.pathway_id, later + Duration::days(1))
            .unwrap();
        assert_eq!(
            f.db.last_doctor_for(case.patient_id, case.pathway_id, third.id)
                .unwrap(),
            Some(f.doc2)
        );
        assert_eq!(
            f.db.last_doctor_for(case.patient_id, case.pathway_id, second.id)
                .unwrap(),
            Some(f.doc1)
        );
    }
}
