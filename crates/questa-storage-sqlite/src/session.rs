//! Active billing session persistence
//!
//! A single-row record of the in-flight usage session. If the process
//! dies mid-session, the next launch finds the row and replays the
//! elapsed interval exactly once before discarding it.

use crate::{Database, Result};
use questa_core::UsageSession;
use rusqlite::{params, OptionalExtension};

/// Usage session storage
pub struct SessionStore<'a> {
    db: &'a Database,
}

impl<'a> SessionStore<'a> {
    /// Create new session store
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Write the active session (insert or overwrite the single row)
    pub fn save(&self, session: &UsageSession) -> Result<()> {
        let updated_at = chrono::Utc::now().timestamp_millis();
        self.db.conn().execute(
            r#"
            INSERT OR REPLACE INTO usage_session
                (id, app_name, started_at, tokens_charged, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4)
            "#,
            params![
                session.app_name,
                session.started_at,
                session.tokens_charged,
                updated_at
            ],
        )?;
        Ok(())
    }

    /// Load the persisted session, if one is pending
    pub fn load(&self) -> Result<Option<UsageSession>> {
        let session = self
            .db
            .conn()
            .query_row(
                "SELECT app_name, started_at, tokens_charged FROM usage_session WHERE id = 1",
                [],
                |row| {
                    Ok(UsageSession {
                        app_name: row.get(0)?,
                        started_at: row.get(1)?,
                        tokens_charged: row.get(2)?,
                        active: true,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Discard the persisted session
    pub fn clear(&self) -> Result<()> {
        self.db
            .conn()
            .execute("DELETE FROM usage_session WHERE id = 1", [])?;
        Ok(())
    }
}
