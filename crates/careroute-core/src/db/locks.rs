//! Cross-instance advisory locks stored alongside the data.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use super::{ts, Database, DbResult};

impl Database {
    /// Take or renew the named lock.
    ///
    /// Succeeds when the lock is free, expired, or already held by `holder`.
    pub fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let at = ts(&now);
        let expires_at = ts(&(now + ttl));
        let rows = self.conn.execute(
            r#"
            INSERT INTO advisory_lock (name, holder, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            WHERE advisory_lock.holder = excluded.holder OR advisory_lock.expires_at <= ?4
            "#,
            params![name, holder, expires_at, at],
        )?;
        Ok(rows > 0)
    }

    /// Release the lock if `holder` still owns it.
    pub fn release_lock(&self, name: &str, holder: &str) -> DbResult<bool> {
        let rows = self.conn.execute(
            "DELETE FROM advisory_lock WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(rows > 0)
    }
}
