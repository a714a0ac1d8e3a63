//! Provider queue items and the global unclaimed queue.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::eligibility::ELIGIBLE_JOIN;
use super::{get_label, get_opt_ts, get_ts, ts, Database, DbError, DbResult};
use crate::models::{
    CareProvidingStateId, CaseId, ProviderId, ProviderQueueItem, QueueEvent, QueueEventType,
    QueueItemStatus, TempHold, UnclaimedEntry,
};

const ITEM_COLUMNS: &str = r#"
    id, provider_id, event_type, reference_id, case_id, status,
    short_description, long_description, tags, enqueued_at, completed_at
"#;

const UNCLAIMED_SELECT: &str = r#"
    SELECT u.id, u.case_id, u.care_providing_state_id, c.state, p.tag,
           u.enqueued_at, u.held_by, u.expires_at
    FROM unclaimed_queue u
    JOIN care_providing_state c ON c.id = u.care_providing_state_id
    JOIN pathway p ON p.id = c.pathway_id
"#;

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderQueueItem> {
    let tags_json: String = row.get(8)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ProviderQueueItem {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        event_type: get_label(row, 2)?,
        reference_id: row.get(3)?,
        case_id: row.get(4)?,
        status: get_label(row, 5)?,
        short_description: row.get(6)?,
        long_description: row.get(7)?,
        tags,
        enqueued_at: get_ts(row, 9)?,
        completed_at: get_opt_ts(row, 10)?,
    })
}

fn unclaimed_from_row(row: &Row<'_>) -> rusqlite::Result<UnclaimedEntry> {
    let held_by: Option<ProviderId> = row.get(6)?;
    let expires_at = get_opt_ts(row, 7)?;
    let hold = match (held_by, expires_at) {
        (Some(provider), Some(expires_at)) => Some(TempHold {
            provider,
            expires_at,
        }),
        _ => None,
    };
    Ok(UnclaimedEntry {
        id: row.get(0)?,
        case_id: row.get(1)?,
        care_providing_state_id: row.get(2)?,
        state: row.get(3)?,
        pathway_tag: row.get(4)?,
        enqueued_at: get_ts(row, 5)?,
        hold,
    })
}

impl Database {
    /// Insert a PENDING item, or refresh the open one for the same
    /// (provider, event type, reference). A refresh never moves `enqueued_at`.
    pub fn upsert_pending_item(
        &self,
        provider_id: ProviderId,
        event: &QueueEvent,
        now: DateTime<Utc>,
    ) -> DbResult<ProviderQueueItem> {
        let tags = serde_json::to_string(&event.tags)?;
        let at = ts(&now);
        self.conn.execute(
            r#"
            INSERT INTO provider_queue_item (
                provider_id, event_type, reference_id, case_id, status,
                short_description, long_description, tags, enqueued_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?6, ?7, ?8, ?8, ?8)
            ON CONFLICT(provider_id, event_type, reference_id) WHERE status IN ('PENDING', 'ONGOING')
            DO UPDATE SET
                short_description = excluded.short_description,
                long_description = excluded.long_description,
                tags = excluded.tags,
                updated_at = excluded.updated_at
            "#,
            params![
                provider_id,
                event.event_type.as_str(),
                event.reference_id,
                event.case_id,
                event.short_description,
                event.long_description,
                tags,
                at
            ],
        )?;
        self.open_item(provider_id, event.event_type, event.reference_id)?
            .ok_or_else(|| {
                DbError::NotFound(format!(
                    "open {} item {} for provider {}",
                    event.event_type.as_str(),
                    event.reference_id,
                    provider_id
                ))
            })
    }

    /// The PENDING or ONGOING item for (provider, event type, reference).
    pub fn open_item(
        &self,
        provider_id: ProviderId,
        event_type: QueueEventType,
        reference_id: i64,
    ) -> DbResult<Option<ProviderQueueItem>> {
        self.conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM provider_queue_item
                    WHERE provider_id = ?1 AND event_type = ?2 AND reference_id = ?3
                      AND status IN ('PENDING', 'ONGOING')
                    "#,
                    ITEM_COLUMNS
                ),
                params![provider_id, event_type.as_str(), reference_id],
                item_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Close the open item with a terminal status.
    ///
    /// When nothing is open a closed row is written directly, so the action
    /// still shows up in history.
    pub fn close_item(
        &self,
        provider_id: ProviderId,
        event: &QueueEvent,
        status: QueueItemStatus,
        now: DateTime<Utc>,
    ) -> DbResult<ProviderQueueItem> {
        if status.is_open() {
            return Err(DbError::Constraint(format!(
                "{} is not a terminal queue status",
                status.as_str()
            )));
        }
        let at = ts(&now);
        if let Some(open) = self.open_item(provider_id, event.event_type, event.reference_id)? {
            self.conn.execute(
                r#"
                UPDATE provider_queue_item SET status = ?2, completed_at = ?3, updated_at = ?3
                WHERE id = ?1
                "#,
                params![open.id, status.as_str(), at],
            )?;
            return Ok(ProviderQueueItem {
                status,
                completed_at: Some(now),
                ..open
            });
        }

        let tags = serde_json::to_string(&event.tags)?;
        self.conn.execute(
            r#"
            INSERT INTO provider_queue_item (
                provider_id, event_type, reference_id, case_id, status,
                short_description, long_description, tags, enqueued_at, completed_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?9, ?9)
            "#,
            params![
                provider_id,
                event.event_type.as_str(),
                event.reference_id,
                event.case_id,
                status.as_str(),
                event.short_description,
                event.long_description,
                tags,
                at
            ],
        )?;
        Ok(ProviderQueueItem {
            id: crate::models::QueueItemId(self.conn.last_insert_rowid()),
            provider_id,
            event_type: event.event_type,
            reference_id: event.reference_id,
            case_id: event.case_id,
            status,
            short_description: event.short_description.clone(),
            long_description: event.long_description.clone(),
            tags: event.tags.clone(),
            enqueued_at: now,
            completed_at: Some(now),
        })
    }

    /// PENDING → ONGOING. Returns false when there is no pending item.
    pub fn mark_item_ongoing(
        &self,
        provider_id: ProviderId,
        event_type: QueueEventType,
        reference_id: i64,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE provider_queue_item SET status = 'ONGOING', updated_at = ?4
            WHERE provider_id = ?1 AND event_type = ?2 AND reference_id = ?3 AND status = 'PENDING'
            "#,
            params![provider_id, event_type.as_str(), reference_id, ts(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Mark a provider's open items of the given type on a case REMOVED.
    pub fn remove_open_items(
        &self,
        provider_id: ProviderId,
        case_id: CaseId,
        event_type: QueueEventType,
        now: DateTime<Utc>,
    ) -> DbResult<usize> {
        let rows = self.conn.execute(
            r#"
            UPDATE provider_queue_item SET status = 'REMOVED', completed_at = ?4, updated_at = ?4
            WHERE provider_id = ?1 AND case_id = ?2 AND event_type = ?3
              AND status IN ('PENDING', 'ONGOING')
            "#,
            params![provider_id, case_id, event_type.as_str(), ts(&now)],
        )?;
        Ok(rows)
    }

    /// Open items, oldest first; ties go to the earlier insert.
    pub fn list_pending_items(&self, provider_id: ProviderId) -> DbResult<Vec<ProviderQueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM provider_queue_item
            WHERE provider_id = ? AND status IN ('PENDING', 'ONGOING')
            ORDER BY enqueued_at, id
            "#,
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map([provider_id], item_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Completed and triaged items, newest first.
    pub fn list_history_items(&self, provider_id: ProviderId) -> DbResult<Vec<ProviderQueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM provider_queue_item
            WHERE provider_id = ? AND status IN ('COMPLETED', 'TRIAGED')
            ORDER BY completed_at DESC, id DESC
            "#,
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map([provider_id], item_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Open items across all providers carrying `tag`.
    pub fn open_items_tagged(&self, tag: &str) -> DbResult<Vec<ProviderQueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM provider_queue_item
            WHERE status IN ('PENDING', 'ONGOING')
              AND EXISTS (SELECT 1 FROM json_each(provider_queue_item.tags) WHERE value = ?)
            ORDER BY enqueued_at, id
            "#,
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map([tag], item_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Add a case to the unclaimed queue. Returns false if it is already there.
    pub fn insert_unclaimed(
        &self,
        case_id: CaseId,
        care_providing_state_id: CareProvidingStateId,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let at = ts(&now);
        let rows = self.conn.execute(
            r#"
            INSERT INTO unclaimed_queue (case_id, care_providing_state_id, enqueued_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3, ?3)
            ON CONFLICT(case_id) DO NOTHING
            "#,
            params![case_id, care_providing_state_id, at],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_unclaimed(&self, case_id: CaseId) -> DbResult<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM unclaimed_queue WHERE case_id = ?", [case_id])?;
        Ok(rows > 0)
    }

    pub fn get_unclaimed(&self, case_id: CaseId) -> DbResult<Option<UnclaimedEntry>> {
        self.conn
            .query_row(
                &format!("{} WHERE u.case_id = ?", UNCLAIMED_SELECT),
                [case_id],
                unclaimed_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Set or clear the temp hold shown on an unclaimed entry.
    pub fn set_unclaimed_hold(
        &self,
        case_id: CaseId,
        hold: Option<TempHold>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE unclaimed_queue SET held_by = ?2, expires_at = ?3, updated_at = ?4
            WHERE case_id = ?1
            "#,
            params![
                case_id,
                hold.map(|h| h.provider),
                hold.map(|h| ts(&h.expires_at)),
                ts(&now)
            ],
        )?;
        Ok(rows > 0)
    }

    /// Unclaimed entries in (state, pathway) pairs the provider can cover,
    /// temp-held ones included.
    pub fn unclaimed_for_provider(&self, provider_id: ProviderId) -> DbResult<Vec<UnclaimedEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            {}
            WHERE u.care_providing_state_id IN (
                SELECT e.care_providing_state_id {} AND e.provider_id = ?1
            )
            ORDER BY u.enqueued_at, u.id
            "#,
            UNCLAIMED_SELECT, ELIGIBLE_JOIN
        ))?;
        let rows = stmt.query_map([provider_id], unclaimed_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Entries waiting in one (state, pathway), oldest first.
    pub fn unclaimed_in_state(
        &self,
        care_providing_state_id: CareProvidingStateId,
    ) -> DbResult<Vec<UnclaimedEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE u.care_providing_state_id = ? ORDER BY u.enqueued_at, u.id",
            UNCLAIMED_SELECT
        ))?;
        let rows = stmt.query_map([care_providing_state_id], unclaimed_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn count_unclaimed(&self, care_providing_state_id: CareProvidingStateId) -> DbResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM unclaimed_queue WHERE care_providing_state_id = ?",
                [care_providing_state_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
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

    fn setup() -> (Database, ProviderId, CaseId, CareProvidingStateId) {
        let db = Database::open_in_memory().unwrap();
        let acne = db.insert_pathway("acne", "Acne", "dermatology", t(0)).unwrap();
        let patient = db.insert_patient("CA", t(0)).unwrap();
        let case = db.insert_case(patient.id, acne.id, t(0)).unwrap();
        let cc = db
            .insert_provider(CareRole::Coordinator, "CC", None, t(0))
            .unwrap();
        let ca = db.ensure_care_providing_state("CA", acne.id, t(0)).unwrap();
        (db, cc.id, case.id, ca.id)
    }

    #[test]
    fn test_refresh_keeps_enqueued_at() {
        let (db, cc, case, _) = setup();
        let event = QueueEvent::case_assignment(case, "dermatology", "please review");
        let first = db.upsert_pending_item(cc, &event, t(10)).unwrap();

        let refreshed = db
            .upsert_pending_item(
                cc,
                &event.clone().with_descriptions("Case assigned", "second look"),
                t(30),
            )
            .unwrap();

        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.enqueued_at, t(10));
        assert_eq!(refreshed.long_description, "second look");
        assert_eq!(db.list_pending_items(cc).unwrap().len(), 1);
    }

    #[test]
    fn test_close_moves_item_to_history() {
        let (db, cc, case, _) = setup();
        let event = QueueEvent::case_assignment(case, "dermatology", "x");
        db.upsert_pending_item(cc, &event, t(0)).unwrap();

        let closed = db
            .close_item(cc, &event, QueueItemStatus::Completed, t(5))
            .unwrap();
        assert_eq!(closed.completed_at, Some(t(5)));
        assert!(db.list_pending_items(cc).unwrap().is_empty());
        assert_eq!(db.list_history_items(cc).unwrap().len(), 1);

        // A fresh pending item can be opened again afterwards
        db.upsert_pending_item(cc, &event, t(6)).unwrap();
        assert_eq!(db.list_pending_items(cc).unwrap().len(), 1);
    }

    #[test]
    fn test_close_without_open_item_writes_history() {
        let (db, cc, case, _) = setup();
        let event = QueueEvent::case_message(case, "dermatology");
        db.close_item(cc, &event, QueueItemStatus::Completed, t(1))
            .unwrap();
        assert_eq!(db.list_history_items(cc).unwrap().len(), 1);
        assert!(db
            .close_item(cc, &event, QueueItemStatus::Pending, t(1))
            .is_err());
    }

    #[test]
    fn test_history_newest_first_and_removed_hidden() {
        let (db, cc, case, _) = setup();
        let a = QueueEvent::new(QueueEventType::RefillRequest, 1).with_case(case);
        let b = QueueEvent::new(QueueEventType::RefillRequest, 2).with_case(case);
        let c = QueueEvent::case_message(case, "dermatology");
        for e in [&a, &b, &c] {
            db.upsert_pending_item(cc, e, t(0)).unwrap();
        }
        db.close_item(cc, &a, QueueItemStatus::Completed, t(1)).unwrap();
        db.close_item(cc, &b, QueueItemStatus::Triaged, t(2)).unwrap();
        db.remove_open_items(cc, case, QueueEventType::CaseMessage, t(3))
            .unwrap();

        let history = db.list_history_items(cc).unwrap();
        let refs: Vec<i64> = history.iter().map(|i| i.reference_id).collect();
        assert_eq!(refs, vec![2, 1]);
        assert!(db.list_pending_items(cc).unwrap().is_empty());
    }

    #[test]
    fn test_items_tagged() {
        let (db, cc, case, _) = setup();
        db.upsert_pending_item(cc, &QueueEvent::case_message(case, "dermatology"), t(0))
            .unwrap();
        assert_eq!(db.open_items_tagged("dermatology").unwrap().len(), 1);
        assert!(db.open_items_tagged("cardiology").unwrap().is_empty());
    }

    #[test]
    fn test_unclaimed_entry_is_unique_per_case() {
        let (db, _, case, ca) = setup();
        assert!(db.insert_unclaimed(case, ca, t(0)).unwrap());
        assert!(!db.insert_unclaimed(case, ca, t(1)).unwrap());

        let entry = db.get_unclaimed(case).unwrap().unwrap();
        assert_eq!(entry.state, "CA");
        assert_eq!(entry.pathway_tag, "acne");
        assert_eq!(entry.enqueued_at, t(0));
        assert!(entry.hold.is_none());
        assert_eq!(db.count_unclaimed(ca).unwrap(), 1);
    }

    #[test]
    fn test_unclaimed_hold_roundtrip() {
        let (db, _, case, ca) = setup();
        let doc = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, t(0))
            .unwrap();
        db.insert_unclaimed(case, ca, t(0)).unwrap();

        let hold = TempHold {
            provider: doc.id,
            expires_at: t(60),
        };
        db.set_unclaimed_hold(case, Some(hold), t(0)).unwrap();
        assert_eq!(db.get_unclaimed(case).unwrap().unwrap().hold, Some(hold));

        db.set_unclaimed_hold(case, None, t(1)).unwrap();
        assert_eq!(db.get_unclaimed(case).unwrap().unwrap().hold, None);
    }

    #[test]
    fn test_unclaimed_visible_only_to_eligible() {
        let (db, _, case, ca) = setup();
        let doc = db
            .insert_provider(CareRole::Doctor, "Dr. One", None, t(0))
            .unwrap();
        let other = db
            .insert_provider(CareRole::Doctor, "Dr. Two", None, t(0))
            .unwrap();
        db.insert_eligibility(ca, doc.id, true, t(0)).unwrap();
        db.insert_unclaimed(case, ca, t(0)).unwrap();

        assert_eq!(db.unclaimed_for_provider(doc.id).unwrap().len(), 1);
        assert!(db.unclaimed_for_provider(other.id).unwrap().is_empty());
    }
}
