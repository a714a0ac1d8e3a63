//! Notification ledgers and communication preferences.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::eligibility::ELIGIBLE_JOIN;
use super::{get_opt_ts, ts, Database, DbResult};
use crate::models::{CareProvidingStateId, CaseId, NotifyCandidate, ProviderId, SnoozeWindow};

impl Database {
    /// Append to the per-provider ledger.
    pub fn record_provider_notified(
        &self,
        provider_id: ProviderId,
        case_id: CaseId,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO provider_notified (provider_id, case_id, notified_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3, ?3)
            "#,
            params![provider_id, case_id, at],
        )?;
        Ok(())
    }

    pub fn last_provider_notification(
        &self,
        provider_id: ProviderId,
    ) -> DbResult<Option<DateTime<Utc>>> {
        self.conn
            .query_row(
                "SELECT MAX(notified_at) FROM provider_notified WHERE provider_id = ?",
                [provider_id],
                |row| get_opt_ts(row, 0),
            )
            .map_err(Into::into)
    }

    /// Mark a (state, pathway) as notified. Returns false if it already was.
    pub fn record_state_pathway_notified(
        &self,
        care_providing_state_id: CareProvidingStateId,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let at = ts(&now);
        let rows = self.conn.execute(
            r#"
            INSERT INTO state_pathway_notified (care_providing_state_id, notified_at, created_at, updated_at)
            VALUES (?1, ?2, ?2, ?2)
            ON CONFLICT(care_providing_state_id) DO NOTHING
            "#,
            params![care_providing_state_id, at],
        )?;
        Ok(rows > 0)
    }

    pub fn state_pathway_notified_at(
        &self,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let at = self
            .conn
            .query_row(
                "SELECT notified_at FROM state_pathway_notified WHERE care_providing_state_id = ?",
                [care_providing_state_id],
                |row| get_opt_ts(row, 0),
            )
            .optional()?;
        Ok(at.flatten())
    }

    pub fn clear_state_pathway_notified(
        &self,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            "DELETE FROM state_pathway_notified WHERE care_providing_state_id = ?",
            [care_providing_state_id],
        )?;
        Ok(rows > 0)
    }

    /// Drop ledger rows written before `cutoff`.
    pub fn clear_state_pathway_notified_before(&self, cutoff: DateTime<Utc>) -> DbResult<usize> {
        let rows = self.conn.execute(
            "DELETE FROM state_pathway_notified WHERE notified_at < ?",
            [ts(&cutoff)],
        )?;
        Ok(rows)
    }

    /// (state, pathway) pairs with unheld unclaimed work and no ledger row.
    pub fn pending_notification_targets(&self) -> DbResult<Vec<CareProvidingStateId>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT u.care_providing_state_id
            FROM unclaimed_queue u
            WHERE u.held_by IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM state_pathway_notified n
                  WHERE n.care_providing_state_id = u.care_providing_state_id
              )
            ORDER BY u.care_providing_state_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// (state, pathway) pairs with any unheld unclaimed work.
    pub fn states_with_unclaimed_work(&self) -> DbResult<Vec<CareProvidingStateId>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT care_providing_state_id FROM unclaimed_queue
            WHERE held_by IS NULL
            ORDER BY care_providing_state_id
            "#,
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Eligible providers who opted into notifications, with their last
    /// notification time.
    pub fn notification_candidates(
        &self,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<Vec<NotifyCandidate>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT e.provider_id,
                   (SELECT pr.timezone FROM provider pr WHERE pr.id = e.provider_id),
                   (SELECT MAX(n.notified_at) FROM provider_notified n WHERE n.provider_id = e.provider_id)
            {}
              AND e.care_providing_state_id = ?1
              AND e.notify = 1
            ORDER BY e.provider_id
            "#,
            ELIGIBLE_JOIN
        ))?;
        let rows = stmt.query_map([care_providing_state_id], |row| {
            Ok(NotifyCandidate {
                provider_id: row.get(0)?,
                timezone: row.get(1)?,
                last_notified: get_opt_ts(row, 2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_snooze(
        &self,
        provider_id: ProviderId,
        window: SnoozeWindow,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO communication_snooze (provider_id, start_hour, num_hours, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![provider_id, window.start_hour, window.num_hours, at],
        )?;
        Ok(())
    }

    pub fn snoozes_for(&self, provider_id: ProviderId) -> DbResult<Vec<SnoozeWindow>> {
        let mut stmt = self.conn.prepare(
            "SELECT start_hour, num_hours FROM communication_snooze WHERE provider_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([provider_id], |row| {
            Ok(SnoozeWindow::new(row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CareRole;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_state_ledger_is_single_row() {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", t(0)).unwrap();
        let ca = db.ensure_care_providing_state("CA", acne.id, t(0)).unwrap();

        assert!(db.record_state_pathway_notified(ca.id, t(0)).unwrap());
        assert!(!db.record_state_pathway_notified(ca.id, t(5)).unwrap());
        assert_eq!(db.state_pathway_notified_at(ca.id).unwrap(), Some(t(0)));

        assert_eq!(db.clear_state_pathway_notified_before(t(0)).unwrap(), 0);
        assert_eq!(db.clear_state_pathway_notified_before(t(1)).unwrap(), 1);
        assert_eq!(db.state_pathway_notified_at(ca.id).unwrap(), None);
    }

    #[test]
    fn test_candidates_carry_last_notification() {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", t(0)).unwrap();
        let ca = db.ensure_care_providing_state("CA", acne.id, t(0)).unwrap();
        let patient = db.insert_patient("CA", t(0)).unwrap();
        let case = db.insert_case(patient.id, acne.id, t(0)).unwrap();

        let d1 = db
            .insert_provider(CareRole::Doctor, "Dr. One", Some("America/Los_Angeles"), t(0))
            .unwrap();
        let d2 = db
            .insert_provider(CareRole::Doctor, "Dr. Two", None, t(0))
            .unwrap();
        let quiet = db
            .insert_provider(CareRole::Doctor, "Dr. Quiet", None, t(0))
            .unwrap();
        db.insert_eligibility(ca.id, d1.id, true, t(0)).unwrap();
        db.insert_eligibility(ca.id, d2.id, true, t(0)).unwrap();
        db.insert_eligibility(ca.id, quiet.id, false, t(0)).unwrap();
        db.record_provider_notified(d1.id, case.id, t(3)).unwrap();

        let candidates = db.notification_candidates(ca.id).unwrap();
        assert_eq!(candidates.len(), 2);
        let c1 = candidates.iter().find(|c| c.provider_id == d1.id).unwrap();
        assert_eq!(c1.last_notified, Some(t(3)));
        assert_eq!(c1.timezone.as_deref(), Some("America/Los_Angeles"));
        let c2 = candidates.iter().find(|c| c.provider_id == d2.id).unwrap();
        assert_eq!(c2.last_notified, None);
    }

    #[test]
    fn test_pending_targets_skip_held_and_notified() {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", t(0)).unwrap();
        let ca = db.ensure_care_providing_state("CA", acne.id, t(0)).unwrap();
        let patient = db.insert_patient("CA", t(0)).unwrap();
        let case = db.insert_case(patient.id, acne.id, t(0)).unwrap();
        db.insert_unclaimed(case.id, ca.id, t(0)).unwrap();

        assert_eq!(db.pending_notification_targets().unwrap(), vec![ca.id]);
        db.record_state_pathway_notified(ca.id, t(1)).unwrap();
        assert!(db.pending_notification_targets().unwrap().is_empty());
        assert_eq!(db.states_with_unclaimed_work().unwrap(), vec![ca.id]);
    }

    #[test]
    fn test_snoozes_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let d1 = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, t(0))
            .unwrap();
        db.insert_snooze(d1.id, SnoozeWindow::new(22, 8), t(0)).unwrap();
        assert_eq!(db.snoozes_for(d1.id).unwrap(), vec![SnoozeWindow::new(22, 8)]);
    }
}
