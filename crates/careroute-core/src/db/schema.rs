//! SQLite schema definition.

/// Complete database schema for the routing engine.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Reference data: pathways, providers, patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS pathway (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    medicine_branch TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'ACTIVE' CHECK (status IN ('ACTIVE', 'RETIRED')),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS provider (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    role TEXT NOT NULL CHECK (role IN ('DOCTOR', 'CC')),
    display_name TEXT NOT NULL,
    timezone TEXT,                               -- IANA name, NULL = UTC
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS patient (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state TEXT NOT NULL,                         -- current US state abbreviation
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

-- ============================================================================
-- Eligibility
-- ============================================================================

CREATE TABLE IF NOT EXISTS care_providing_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    state TEXT NOT NULL,
    pathway_id INTEGER NOT NULL REFERENCES pathway(id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (state, pathway_id)
);

CREATE TABLE IF NOT EXISTS provider_practice_model (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    state TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (provider_id, state)
);

CREATE TABLE IF NOT EXISTS state_pathway_eligibility (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    care_providing_state_id INTEGER NOT NULL REFERENCES care_providing_state(id),
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    notify INTEGER NOT NULL DEFAULT 0,
    unavailable INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (care_providing_state_id, provider_id)
);

CREATE INDEX IF NOT EXISTS idx_eligibility_provider ON state_pathway_eligibility(provider_id);

-- ============================================================================
-- Cases and visits
-- ============================================================================

CREATE TABLE IF NOT EXISTS patient_case (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES patient(id),
    pathway_id INTEGER NOT NULL REFERENCES pathway(id),
    status TEXT NOT NULL DEFAULT 'OPEN'
        CHECK (status IN ('OPEN', 'SUBMITTED', 'ACTIVE', 'TRIAGED', 'INACTIVE')),
    claimed INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1,
    closed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_case_patient ON patient_case(patient_id, pathway_id);

-- A claimed case never returns to unclaimed
CREATE TRIGGER IF NOT EXISTS patient_case_claimed_monotonic
BEFORE UPDATE OF claimed ON patient_case
WHEN old.claimed = 1 AND new.claimed = 0
BEGIN
    SELECT RAISE(ABORT, 'claimed case cannot become unclaimed');
END;

-- OPEN -> SUBMITTED -> ACTIVE -> (TRIAGED | INACTIVE)
CREATE TRIGGER IF NOT EXISTS patient_case_status_monotonic
BEFORE UPDATE OF status ON patient_case
WHEN new.status <> old.status AND (
    old.status IN ('TRIAGED', 'INACTIVE')
    OR (CASE new.status WHEN 'OPEN' THEN 0 WHEN 'SUBMITTED' THEN 1 WHEN 'ACTIVE' THEN 2 ELSE 3 END)
     < (CASE old.status WHEN 'OPEN' THEN 0 WHEN 'SUBMITTED' THEN 1 WHEN 'ACTIVE' THEN 2 ELSE 3 END)
)
BEGIN
    SELECT RAISE(ABORT, 'case status transitions are monotonic');
END;

CREATE TABLE IF NOT EXISTS visit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES patient_case(id),
    status TEXT NOT NULL DEFAULT 'OPEN'
        CHECK (status IN ('OPEN', 'SUBMITTED', 'ROUTED', 'TREATED', 'TRIAGED')),
    designated_provider_id INTEGER REFERENCES provider(id),
    is_followup INTEGER NOT NULL DEFAULT 0,
    submitted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_visit_case ON visit(case_id);

CREATE TABLE IF NOT EXISTS case_note (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES patient_case(id),
    author_id INTEGER REFERENCES provider(id),  -- NULL for system notes
    tag TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_note_case ON case_note(case_id);

CREATE TABLE IF NOT EXISTS case_message (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES patient_case(id),
    patient_id INTEGER REFERENCES patient(id),
    provider_id INTEGER REFERENCES provider(id),
    body TEXT NOT NULL,
    private INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    CHECK ((patient_id IS NULL) <> (provider_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_message_case ON case_message(case_id);

-- ============================================================================
-- Care team
-- ============================================================================

CREATE TABLE IF NOT EXISTS care_team_assignment (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES patient_case(id),
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    role TEXT NOT NULL CHECK (role IN ('DOCTOR', 'CC')),
    status TEXT NOT NULL CHECK (status IN ('TEMP', 'ACTIVE', 'INACTIVE')),
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    -- TEMP carries an expiry, nothing else does
    CHECK ((status = 'TEMP') = (expires_at IS NOT NULL))
);

-- At most one live (TEMP or ACTIVE) assignment per (case, role)
CREATE UNIQUE INDEX IF NOT EXISTS ux_care_team_live
    ON care_team_assignment(case_id, role)
    WHERE status IN ('TEMP', 'ACTIVE');

CREATE INDEX IF NOT EXISTS idx_care_team_provider ON care_team_assignment(provider_id);
CREATE INDEX IF NOT EXISTS idx_care_team_expiry
    ON care_team_assignment(expires_at)
    WHERE status = 'TEMP';

-- ============================================================================
-- Queues
-- ============================================================================

CREATE TABLE IF NOT EXISTS unclaimed_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL UNIQUE REFERENCES patient_case(id),
    care_providing_state_id INTEGER NOT NULL REFERENCES care_providing_state(id),
    enqueued_at TEXT NOT NULL,
    held_by INTEGER REFERENCES provider(id),
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    CHECK ((held_by IS NULL) = (expires_at IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_unclaimed_state ON unclaimed_queue(care_providing_state_id);

CREATE TABLE IF NOT EXISTS provider_queue_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    event_type TEXT NOT NULL CHECK (event_type IN (
        'PATIENT_VISIT', 'TREATMENT_PLAN', 'CASE_MESSAGE',
        'CASE_ASSIGNMENT', 'REFILL_REQUEST', 'TRANSMISSION_ERROR')),
    reference_id INTEGER NOT NULL,
    case_id INTEGER REFERENCES patient_case(id),
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'ONGOING', 'TRIAGED', 'COMPLETED', 'REMOVED')),
    short_description TEXT NOT NULL DEFAULT '',
    long_description TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',              -- JSON array of strings
    enqueued_at TEXT NOT NULL,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    CHECK ((status IN ('PENDING', 'ONGOING')) = (completed_at IS NULL))
);

-- At most one open item per (provider, event type, reference)
CREATE UNIQUE INDEX IF NOT EXISTS ux_queue_item_open
    ON provider_queue_item(provider_id, event_type, reference_id)
    WHERE status IN ('PENDING', 'ONGOING');

CREATE INDEX IF NOT EXISTS idx_queue_item_provider ON provider_queue_item(provider_id, status);

-- ============================================================================
-- Notification ledger
-- ============================================================================

CREATE TABLE IF NOT EXISTS provider_notified (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    case_id INTEGER NOT NULL REFERENCES patient_case(id),
    notified_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_provider_notified ON provider_notified(provider_id, notified_at);

CREATE TABLE IF NOT EXISTS state_pathway_notified (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    care_providing_state_id INTEGER NOT NULL UNIQUE REFERENCES care_providing_state(id),
    notified_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS communication_snooze (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    start_hour INTEGER NOT NULL CHECK (start_hour BETWEEN 0 AND 23),
    num_hours INTEGER NOT NULL CHECK (num_hours BETWEEN 0 AND 24),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_snooze_provider ON communication_snooze(provider_id);

-- ============================================================================
-- Cross-instance advisory locks
-- ============================================================================

CREATE TABLE IF NOT EXISTS advisory_lock (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO pathway (tag, name, medicine_branch) VALUES ('acne', 'Acne', 'dermatology');
            INSERT INTO provider (role, display_name) VALUES ('DOCTOR', 'Dr. One');
            INSERT INTO provider (role, display_name) VALUES ('DOCTOR', 'Dr. Two');
            INSERT INTO patient (state) VALUES ('CA');
            INSERT INTO patient_case (patient_id, pathway_id) VALUES (1, 1);
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
        // Idempotent
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_temp_requires_expiry_constraint() {
        let conn = seeded();

        let result = conn.execute(
            "INSERT INTO care_team_assignment (case_id, provider_id, role, status) VALUES (1, 1, 'DOCTOR', 'TEMP')",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "INSERT INTO care_team_assignment (case_id, provider_id, role, status, expires_at) VALUES (1, 1, 'DOCTOR', 'ACTIVE', '2024-01-01T00:00:00.000000Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_single_live_doctor_per_case() {
        let conn = seeded();

        conn.execute(
            "INSERT INTO care_team_assignment (case_id, provider_id, role, status, expires_at) VALUES (1, 1, 'DOCTOR', 'TEMP', '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        // A second live doctor is rejected, whatever its status
        let result = conn.execute(
            "INSERT INTO care_team_assignment (case_id, provider_id, role, status) VALUES (1, 2, 'DOCTOR', 'ACTIVE')",
            [],
        );
        assert!(result.is_err());

        // Inactive rows are unconstrained
        let result = conn.execute(
            "INSERT INTO care_team_assignment (case_id, provider_id, role, status) VALUES (1, 2, 'DOCTOR', 'INACTIVE')",
            [],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_claimed_cannot_be_reset() {
        let conn = seeded();
        conn.execute("UPDATE patient_case SET claimed = 1 WHERE id = 1", [])
            .unwrap();
        let result = conn.execute("UPDATE patient_case SET claimed = 0 WHERE id = 1", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_case_status_cannot_regress() {
        let conn = seeded();
        conn.execute("UPDATE patient_case SET status = 'ACTIVE' WHERE id = 1", [])
            .unwrap();
        let result = conn.execute("UPDATE patient_case SET status = 'SUBMITTED' WHERE id = 1", []);
        assert!(result.is_err());

        conn.execute("UPDATE patient_case SET status = 'TRIAGED' WHERE id = 1", [])
            .unwrap();
        let result = conn.execute("UPDATE patient_case SET status = 'INACTIVE' WHERE id = 1", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_one_open_queue_item_per_reference() {
        let conn = seeded();
        let insert = "INSERT INTO provider_queue_item (provider_id, event_type, reference_id, status, enqueued_at) VALUES (1, 'CASE_ASSIGNMENT', 1, 'PENDING', '2024-01-01T00:00:00.000000Z')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());

        conn.execute(
            "UPDATE provider_queue_item SET status = 'COMPLETED', completed_at = '2024-01-01T01:00:00.000000Z'",
            [],
        )
        .unwrap();
        assert!(conn.execute(insert, []).is_ok());
    }
}
