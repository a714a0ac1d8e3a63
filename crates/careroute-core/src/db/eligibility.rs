//! Care-providing states and provider eligibility.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{ts, Database, DbResult};
use crate::models::{
    CareProvidingState, CareProvidingStateId, PathwayId, ProviderId, StateEligibility,
};

/// Join that keeps only usable eligibility rows: available, with an active
/// practice model in the row's state.
pub(super) const ELIGIBLE_JOIN: &str = r#"
    FROM state_pathway_eligibility e
    JOIN care_providing_state c ON c.id = e.care_providing_state_id
    JOIN provider_practice_model m
      ON m.provider_id = e.provider_id AND m.state = c.state AND m.active = 1
    WHERE e.unavailable = 0
"#;

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<CareProvidingState> {
    Ok(CareProvidingState {
        id: row.get(0)?,
        state: row.get(1)?,
        pathway_id: row.get(2)?,
    })
}

impl Database {
    /// Get or create the (state, pathway) pair.
    pub fn ensure_care_providing_state(
        &self,
        state: &str,
        pathway_id: PathwayId,
        now: DateTime<Utc>,
    ) -> DbResult<CareProvidingState> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO care_providing_state (state, pathway_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(state, pathway_id) DO NOTHING
            "#,
            params![state, pathway_id, at],
        )?;
        self.conn
            .query_row(
                "SELECT id, state, pathway_id FROM care_providing_state WHERE state = ?1 AND pathway_id = ?2",
                params![state, pathway_id],
                state_from_row,
            )
            .map_err(Into::into)
    }

    /// Look up the (state, pathway) pair by state abbreviation and pathway tag.
    pub fn care_providing_state(
        &self,
        state: &str,
        pathway_tag: &str,
    ) -> DbResult<Option<CareProvidingState>> {
        self.conn
            .query_row(
                r#"
                SELECT c.id, c.state, c.pathway_id
                FROM care_providing_state c
                JOIN pathway p ON p.id = c.pathway_id
                WHERE c.state = ?1 AND p.tag = ?2
                "#,
                params![state, pathway_tag],
                state_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_care_providing_state(
        &self,
        id: CareProvidingStateId,
    ) -> DbResult<Option<CareProvidingState>> {
        self.conn
            .query_row(
                "SELECT id, state, pathway_id FROM care_providing_state WHERE id = ?",
                [id],
                state_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Make a provider eligible for a (state, pathway).
    ///
    /// Also records an active practice model for the state unless one exists.
    pub fn insert_eligibility(
        &self,
        care_providing_state_id: CareProvidingStateId,
        provider_id: ProviderId,
        notify: bool,
        now: DateTime<Utc>,
    ) -> DbResult<StateEligibility> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO provider_practice_model (provider_id, state, active, created_at, updated_at)
            SELECT ?1, state, 1, ?3, ?3 FROM care_providing_state WHERE id = ?2
            ON CONFLICT(provider_id, state) DO NOTHING
            "#,
            params![provider_id, care_providing_state_id, at],
        )?;
        self.conn.execute(
            r#"
            INSERT INTO state_pathway_eligibility (
                care_providing_state_id, provider_id, notify, unavailable, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 0, ?4, ?4)
            "#,
            params![care_providing_state_id, provider_id, notify, at],
        )?;
        Ok(StateEligibility {
            id: self.conn.last_insert_rowid(),
            care_providing_state_id,
            provider_id,
            notify,
            unavailable: false,
        })
    }

    pub fn get_eligibility(
        &self,
        care_providing_state_id: CareProvidingStateId,
        provider_id: ProviderId,
    ) -> DbResult<Option<StateEligibility>> {
        self.conn
            .query_row(
                r#"
                SELECT id, care_providing_state_id, provider_id, notify, unavailable
                FROM state_pathway_eligibility
                WHERE care_providing_state_id = ?1 AND provider_id = ?2
                "#,
                params![care_providing_state_id, provider_id],
                |row| {
                    Ok(StateEligibility {
                        id: row.get(0)?,
                        care_providing_state_id: row.get(1)?,
                        provider_id: row.get(2)?,
                        notify: row.get(3)?,
                        unavailable: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Toggle availability for one (state, pathway).
    pub fn set_provider_unavailable(
        &self,
        care_providing_state_id: CareProvidingStateId,
        provider_id: ProviderId,
        unavailable: bool,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE state_pathway_eligibility SET unavailable = ?3, updated_at = ?4
            WHERE care_providing_state_id = ?1 AND provider_id = ?2
            "#,
            params![care_providing_state_id, provider_id, unavailable, ts(&now)],
        )?;
        Ok(rows > 0)
    }

    pub fn set_eligibility_notify(
        &self,
        care_providing_state_id: CareProvidingStateId,
        provider_id: ProviderId,
        notify: bool,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE state_pathway_eligibility SET notify = ?3, updated_at = ?4
            WHERE care_providing_state_id = ?1 AND provider_id = ?2
            "#,
            params![care_providing_state_id, provider_id, notify, ts(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Activate or deactivate a provider's practice in a state.
    pub fn set_practice_model_active(
        &self,
        provider_id: ProviderId,
        state: &str,
        active: bool,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO provider_practice_model (provider_id, state, active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(provider_id, state) DO UPDATE SET active = excluded.active, updated_at = excluded.updated_at
            "#,
            params![provider_id, state, active, at],
        )?;
        Ok(())
    }

    /// Eligible, available, and practicing in the state.
    pub fn is_provider_eligible(
        &self,
        provider_id: ProviderId,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT e.id {} AND e.provider_id = ?1 AND e.care_providing_state_id = ?2",
                    ELIGIBLE_JOIN
                ),
                params![provider_id, care_providing_state_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Providers currently eligible for a (state, pathway), by id.
    pub fn eligible_providers(
        &self,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<Vec<ProviderId>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT e.provider_id {} AND e.care_providing_state_id = ?1 ORDER BY e.provider_id",
            ELIGIBLE_JOIN
        ))?;
        let rows = stmt.query_map([care_providing_state_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// (state, pathway) pairs a provider can currently cover.
    pub fn eligible_care_providing_states(
        &self,
        provider_id: ProviderId,
    ) -> DbResult<Vec<CareProvidingStateId>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT e.care_providing_state_id {} AND e.provider_id = ?1 ORDER BY e.care_providing_state_id",
            ELIGIBLE_JOIN
        ))?;
        let rows = stmt.query_map([provider_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CareRole;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_ensure_state_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", now()).unwrap();
        let first = db.ensure_care_providing_state("CA", acne.id, now()).unwrap();
        let second = db.ensure_care_providing_state("CA", acne.id, now()).unwrap();
        assert_eq!(first, second);

        let by_tag = db.care_providing_state("CA", "acne").unwrap().unwrap();
        assert_eq!(by_tag.id, first.id);
        assert!(db.care_providing_state("NY", "acne").unwrap().is_none());
    }

    #[test]
    fn test_eligibility_requires_availability_and_practice_model() {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", now()).unwrap();
        let ca = db.ensure_care_providing_state("CA", acne.id, now()).unwrap();
        let doc = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, now())
            .unwrap();

        assert!(!db.is_provider_eligible(doc.id, ca.id).unwrap());

        db.insert_eligibility(ca.id, doc.id, true, now()).unwrap();
        assert!(db.is_provider_eligible(doc.id, ca.id).unwrap());
        assert_eq!(db.eligible_providers(ca.id).unwrap(), vec![doc.id]);

        db.set_provider_unavailable(ca.id, doc.id, true, now()).unwrap();
        assert!(!db.is_provider_eligible(doc.id, ca.id).unwrap());
        db.set_provider_unavailable(ca.id, doc.id, false, now()).unwrap();

        db.set_practice_model_active(doc.id, "CA", false, now()).unwrap();
        assert!(!db.is_provider_eligible(doc.id, ca.id).unwrap());
        assert!(db.eligible_care_providing_states(doc.id).unwrap().is_empty());
    }
}
