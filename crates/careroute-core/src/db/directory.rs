//! Pathway, provider and patient records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{get_label, get_ts, ts, Database, DbError, DbResult};
use crate::models::{
    CareRole, Pathway, PathwayId, PathwayStatus, Patient, PatientId, Provider, ProviderId,
};

fn pathway_from_row(row: &Row<'_>) -> rusqlite::Result<Pathway> {
    Ok(Pathway {
        id: row.get(0)?,
        tag: row.get(1)?,
        name: row.get(2)?,
        medicine_branch: row.get(3)?,
        status: get_label(row, 4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        role: get_label(row, 1)?,
        display_name: row.get(2)?,
        timezone: row.get(3)?,
        created_at: get_ts(row, 4)?,
    })
}

const PATHWAY_COLUMNS: &str = "id, tag, name, medicine_branch, status, created_at";
const PROVIDER_COLUMNS: &str = "id, role, display_name, timezone, created_at";

impl Database {
    /// Create a pathway. Tags are unique and never change.
    pub fn insert_pathway(
        &self,
        tag: &str,
        name: &str,
        medicine_branch: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Pathway> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO pathway (tag, name, medicine_branch, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'ACTIVE', ?4, ?4)
            "#,
            params![tag, name, medicine_branch, at],
        )?;
        Ok(Pathway {
            id: PathwayId(self.conn.last_insert_rowid()),
            tag: tag.to_string(),
            name: name.to_string(),
            medicine_branch: medicine_branch.to_string(),
            status: PathwayStatus::Active,
            created_at: now,
        })
    }

    pub fn get_pathway(&self, id: PathwayId) -> DbResult<Option<Pathway>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM pathway WHERE id = ?", PATHWAY_COLUMNS),
                [id],
                pathway_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_pathway(&self, id: PathwayId) -> DbResult<Pathway> {
        self.get_pathway(id)?
            .ok_or_else(|| DbError::NotFound(format!("pathway {}", id)))
    }

    pub fn pathway_by_tag(&self, tag: &str) -> DbResult<Option<Pathway>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM pathway WHERE tag = ?", PATHWAY_COLUMNS),
                [tag],
                pathway_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_pathway_status(
        &self,
        id: PathwayId,
        status: PathwayStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            "UPDATE pathway SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), ts(&now)],
        )?;
        Ok(rows > 0)
    }

    pub fn insert_provider(
        &self,
        role: CareRole,
        display_name: &str,
        timezone: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<Provider> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO provider (role, display_name, timezone, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![role.as_str(), display_name, timezone, at],
        )?;
        Ok(Provider {
            id: ProviderId(self.conn.last_insert_rowid()),
            role,
            display_name: display_name.to_string(),
            timezone: timezone.map(str::to_string),
            created_at: now,
        })
    }

    pub fn get_provider(&self, id: ProviderId) -> DbResult<Option<Provider>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM provider WHERE id = ?", PROVIDER_COLUMNS),
                [id],
                provider_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_provider(&self, id: ProviderId) -> DbResult<Provider> {
        self.get_provider(id)?
            .ok_or_else(|| DbError::NotFound(format!("provider {}", id)))
    }

    pub fn set_provider_timezone(
        &self,
        id: ProviderId,
        timezone: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            "UPDATE provider SET timezone = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, timezone, ts(&now)],
        )?;
        Ok(rows > 0)
    }

    pub fn insert_patient(&self, state: &str, now: DateTime<Utc>) -> DbResult<Patient> {
        let at = ts(&now);
        self.conn.execute(
            "INSERT INTO patient (state, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![state, at],
        )?;
        Ok(Patient {
            id: PatientId(self.conn.last_insert_rowid()),
            state: state.to_string(),
            created_at: now,
        })
    }

    pub fn get_patient(&self, id: PatientId) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                "SELECT id, state, created_at FROM patient WHERE id = ?",
                [id],
                |row| {
                    Ok(Patient {
                        id: row.get(0)?,
                        state: row.get(1)?,
                        created_at: get_ts(row, 2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_patient(&self, id: PatientId) -> DbResult<Patient> {
        self.get_patient(id)?
            .ok_or_else(|| DbError::NotFound(format!("patient {}", id)))
    }

    /// Record the state the patient is currently located in.
    pub fn set_patient_state(
        &self,
        id: PatientId,
        state: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            "UPDATE patient SET state = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, state, ts(&now)],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_pathway_roundtrip_by_tag() {
        let db = Database::open_in_memory().unwrap();
        let created = db
            .insert_pathway("acne", "Acne", "dermatology", now())
            .unwrap();

        let found = db.pathway_by_tag("acne").unwrap().unwrap();
        assert_eq!(found, created);
        assert!(db.pathway_by_tag("rosacea").unwrap().is_none());

        // Tags are unique
        assert!(db.insert_pathway("acne", "Other", "x", now()).is_err());
    }

    #[test]
    fn test_provider_timezone_update() {
        let db = Database::open_in_memory().unwrap();
        let doc = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, now())
            .unwrap();
        assert!(db
            .set_provider_timezone(doc.id, Some("America/New_York"), now())
            .unwrap());

        let loaded = db.require_provider(doc.id).unwrap();
        assert_eq!(loaded.timezone.as_deref(), Some("America/New_York"));
        assert!(matches!(
            db.require_provider(ProviderId(99)),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_patient_state_change() {
        let db = Database::open_in_memory().unwrap();
        let patient = db.insert_patient("CA", now()).unwrap();
        db.set_patient_state(patient.id, "NY", now()).unwrap();
        assert_eq!(db.require_patient(patient.id).unwrap().state, "NY");
    }
}
