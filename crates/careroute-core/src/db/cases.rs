//! Case, visit, note and message operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{get_label, get_opt_ts, get_ts, ts, Database, DbError, DbResult};
use crate::models::{
    CaseId, CaseMessage, CaseNote, CaseStatus, MessageAuthor, NoteTag, PathwayId, PatientCase,
    PatientId, ProviderId, Visit, VisitId, VisitStatus,
};

const CASE_COLUMNS: &str =
    "id, patient_id, pathway_id, status, claimed, version, created_at, closed_at";
const VISIT_COLUMNS: &str =
    "id, case_id, status, designated_provider_id, is_followup, created_at, submitted_at";

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<PatientCase> {
    Ok(PatientCase {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        pathway_id: row.get(2)?,
        status: get_label(row, 3)?,
        claimed: row.get(4)?,
        version: row.get(5)?,
        created_at: get_ts(row, 6)?,
        closed_at: get_opt_ts(row, 7)?,
    })
}

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: row.get(0)?,
        case_id: row.get(1)?,
        status: get_label(row, 2)?,
        designated_provider: row.get(3)?,
        is_followup: row.get(4)?,
        created_at: get_ts(row, 5)?,
        submitted_at: get_opt_ts(row, 6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<CaseMessage> {
    let patient: Option<PatientId> = row.get(2)?;
    let provider: Option<ProviderId> = row.get(3)?;
    let author = match (patient, provider) {
        (Some(p), None) => MessageAuthor::Patient(p),
        (None, Some(p)) => MessageAuthor::Provider(p),
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                2,
                "author".to_string(),
                rusqlite::types::Type::Null,
            ))
        }
    };
    Ok(CaseMessage {
        id: row.get(0)?,
        case_id: row.get(1)?,
        author,
        body: row.get(4)?,
        private: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

impl Database {
    /// Create an OPEN, unclaimed case.
    pub fn insert_case(
        &self,
        patient_id: PatientId,
        pathway_id: PathwayId,
        now: DateTime<Utc>,
    ) -> DbResult<PatientCase> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO patient_case (patient_id, pathway_id, status, claimed, version, created_at, updated_at)
            VALUES (?1, ?2, 'OPEN', 0, 1, ?3, ?3)
            "#,
            params![patient_id, pathway_id, at],
        )?;
        Ok(PatientCase {
            id: CaseId(self.conn.last_insert_rowid()),
            patient_id,
            pathway_id,
            status: CaseStatus::Open,
            claimed: false,
            version: 1,
            created_at: now,
            closed_at: None,
        })
    }

    pub fn get_case(&self, id: CaseId) -> DbResult<Option<PatientCase>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM patient_case WHERE id = ?", CASE_COLUMNS),
                [id],
                case_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_case(&self, id: CaseId) -> DbResult<PatientCase> {
        self.get_case(id)?
            .ok_or_else(|| DbError::NotFound(format!("case {}", id)))
    }

    pub fn case_by_visit(&self, visit_id: VisitId) -> DbResult<Option<PatientCase>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM patient_case WHERE id = (SELECT case_id FROM visit WHERE id = ?)",
                    CASE_COLUMNS
                ),
                [visit_id],
                case_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// All cases of a patient, newest first.
    pub fn cases_for_patient(&self, patient_id: PatientId) -> DbResult<Vec<PatientCase>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patient_case WHERE patient_id = ? ORDER BY created_at DESC, id DESC",
            CASE_COLUMNS
        ))?;
        let rows = stmt.query_map([patient_id], case_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The patient's not-yet-closed case on a pathway, if any.
    pub fn open_case_for(
        &self,
        patient_id: PatientId,
        pathway_id: PathwayId,
    ) -> DbResult<Option<PatientCase>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM patient_case
                    WHERE patient_id = ?1 AND pathway_id = ?2 AND status NOT IN ('TRIAGED', 'INACTIVE')
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "#,
                    CASE_COLUMNS
                ),
                params![patient_id, pathway_id],
                case_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Move a case to `status`, guarded by the caller's view of `version`.
    ///
    /// Setting the current status again is a no-op. A stale version fails with
    /// `Conflict`; a backwards transition fails with `Constraint`.
    pub fn update_case_status(
        &self,
        case: &PatientCase,
        status: CaseStatus,
        now: DateTime<Utc>,
    ) -> DbResult<PatientCase> {
        if case.status == status {
            return Ok(case.clone());
        }
        if !case.status.can_transition_to(status) {
            return Err(DbError::Constraint(format!(
                "case {} cannot move from {} to {}",
                case.id,
                case.status.as_str(),
                status.as_str()
            )));
        }
        let closed_at = status.is_closed().then_some(now);
        let rows = self.conn.execute(
            r#"
            UPDATE patient_case
            SET status = ?3, closed_at = COALESCE(?4, closed_at), version = version + 1, updated_at = ?5
            WHERE id = ?1 AND version = ?2
            "#,
            params![
                case.id,
                case.version,
                status.as_str(),
                closed_at.as_ref().map(ts),
                ts(&now)
            ],
        )?;
        if rows == 0 {
            return match self.get_case(case.id)? {
                Some(_) => Err(DbError::Conflict(format!(
                    "case {} changed since version {}",
                    case.id, case.version
                ))),
                None => Err(DbError::NotFound(format!("case {}", case.id))),
            };
        }
        Ok(PatientCase {
            status,
            version: case.version + 1,
            closed_at: closed_at.or(case.closed_at),
            ..case.clone()
        })
    }

    /// Set `claimed`. Returns false when it already was.
    pub fn mark_case_claimed(&self, id: CaseId, now: DateTime<Utc>) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE patient_case SET claimed = 1, updated_at = ?2
            WHERE id = ?1 AND claimed = 0
            "#,
            params![id, ts(&now)],
        )?;
        Ok(rows > 0)
    }

    pub fn insert_visit(
        &self,
        case_id: CaseId,
        designated_provider: Option<ProviderId>,
        is_followup: bool,
        now: DateTime<Utc>,
    ) -> DbResult<Visit> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO visit (case_id, status, designated_provider_id, is_followup, created_at, updated_at)
            VALUES (?1, 'OPEN', ?2, ?3, ?4, ?4)
            "#,
            params![case_id, designated_provider, is_followup, at],
        )?;
        Ok(Visit {
            id: VisitId(self.conn.last_insert_rowid()),
            case_id,
            status: VisitStatus::Open,
            designated_provider,
            is_followup,
            created_at: now,
            submitted_at: None,
        })
    }

    pub fn get_visit(&self, id: VisitId) -> DbResult<Option<Visit>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM visit WHERE id = ?", VISIT_COLUMNS),
                [id],
                visit_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_visit(&self, id: VisitId) -> DbResult<Visit> {
        self.get_visit(id)?
            .ok_or_else(|| DbError::NotFound(format!("visit {}", id)))
    }

    /// Visits of a case in creation order.
    pub fn visits_for_case(&self, case_id: CaseId) -> DbResult<Vec<Visit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM visit WHERE case_id = ? ORDER BY created_at, id",
            VISIT_COLUMNS
        ))?;
        let rows = stmt.query_map([case_id], visit_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent visit of a case.
    pub fn latest_visit(&self, case_id: CaseId) -> DbResult<Option<Visit>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM visit WHERE case_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
                    VISIT_COLUMNS
                ),
                [case_id],
                visit_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn update_visit_status(
        &self,
        id: VisitId,
        status: VisitStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let at = ts(&now);
        let submitted_at = (status == VisitStatus::Submitted).then(|| at.clone());
        let rows = self.conn.execute(
            r#"
            UPDATE visit SET status = ?2, submitted_at = COALESCE(?3, submitted_at), updated_at = ?4
            WHERE id = ?1
            "#,
            params![id, status.as_str(), submitted_at, at],
        )?;
        Ok(rows > 0)
    }

    pub fn insert_note(
        &self,
        case_id: CaseId,
        author_id: Option<ProviderId>,
        tag: NoteTag,
        body: &str,
        now: DateTime<Utc>,
    ) -> DbResult<CaseNote> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO case_note (case_id, author_id, tag, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![case_id, author_id, tag.label(), body, at],
        )?;
        Ok(CaseNote {
            id: self.conn.last_insert_rowid(),
            case_id,
            author_id,
            tag,
            body: body.to_string(),
            created_at: now,
        })
    }

    /// Notes of a case, oldest first.
    pub fn notes_for_case(&self, case_id: CaseId) -> DbResult<Vec<CaseNote>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, case_id, author_id, tag, body, created_at
            FROM case_note WHERE case_id = ? ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt.query_map([case_id], |row| {
            Ok(CaseNote {
                id: row.get(0)?,
                case_id: row.get(1)?,
                author_id: row.get(2)?,
                tag: get_label(row, 3)?,
                body: row.get(4)?,
                created_at: get_ts(row, 5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_message(
        &self,
        case_id: CaseId,
        author: MessageAuthor,
        body: &str,
        private: bool,
        now: DateTime<Utc>,
    ) -> DbResult<CaseMessage> {
        let (patient, provider) = match author {
            MessageAuthor::Patient(p) => (Some(p), None),
            MessageAuthor::Provider(p) => (None, Some(p)),
        };
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO case_message (case_id, patient_id, provider_id, body, private, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![case_id, patient, provider, body, private, at],
        )?;
        Ok(CaseMessage {
            id: self.conn.last_insert_rowid(),
            case_id,
            author,
            body: body.to_string(),
            private,
            created_at: now,
        })
    }

    /// Messages of a case, oldest first.
    pub fn messages_for_case(&self, case_id: CaseId) -> DbResult<Vec<CaseMessage>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, case_id, patient_id, provider_id, body, private, created_at
            FROM case_message WHERE case_id = ? ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt.query_map([case_id], message_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
