//! Rolling backup snapshot store for corruption recovery
//!
//! Keeps timestamped {profile, last-N transactions} snapshots so a
//! corrupted ledger can be rolled back to the most recent known-good
//! state. Snapshots are write-once; a retention sweep prunes old ones.

use crate::{Database, Result};
use questa_core::{BackupReason, BackupSnapshot, Profile, TransactionRecord};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct BackupPayload {
    profile: Profile,
    transactions: Vec<TransactionRecord>,
}

/// Backup snapshot storage
pub struct BackupStore<'a> {
    db: &'a Database,
}

impl<'a> BackupStore<'a> {
    /// Create new backup store
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Persist a snapshot; returns its row id
    pub fn save(
        &self,
        profile: &Profile,
        transactions: &[TransactionRecord],
        reason: BackupReason,
    ) -> Result<i64> {
        let created_at = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&BackupPayload {
            profile: profile.clone(),
            transactions: transactions.to_vec(),
        })?;

        self.db.conn().execute(
            "INSERT INTO backups (created_at, reason, payload) VALUES (?1, ?2, ?3)",
            params![created_at, reason.as_str(), payload],
        )?;

        tracing::info!(
            "Backup saved ({}): balance={}, {} transaction(s)",
            reason.as_str(),
            profile.balance,
            transactions.len()
        );
        Ok(self.db.conn().last_insert_rowid())
    }

    /// Most recent snapshot, or None if none exists
    pub fn latest(&self) -> Result<Option<BackupSnapshot>> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT created_at, reason, payload FROM backups ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((created_at, reason, payload)) => {
                let payload: BackupPayload = serde_json::from_str(&payload)?;
                Ok(Some(BackupSnapshot {
                    profile: payload.profile,
                    transactions: payload.transactions,
                    reason: BackupReason::parse(&reason).unwrap_or(BackupReason::Manual),
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Up to `limit` snapshots, newest first.
    ///
    /// Restoration scans these for the most recent snapshot that still
    /// passes validation, so a corrupt snapshot does not poison recovery.
    pub fn list_newest(&self, limit: u32) -> Result<Vec<BackupSnapshot>> {
        let mut stmt = self.db.conn().prepare(
            "SELECT created_at, reason, payload FROM backups ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (created_at, reason, payload) = row?;
            let payload: BackupPayload = serde_json::from_str(&payload)?;
            snapshots.push(BackupSnapshot {
                profile: payload.profile,
                transactions: payload.transactions,
                reason: BackupReason::parse(&reason).unwrap_or(BackupReason::Manual),
                created_at,
            });
        }
        Ok(snapshots)
    }

    /// Timestamp of the most recent snapshot
    pub fn last_backup_at(&self) -> Result<Option<i64>> {
        let at: Option<i64> = self
            .db
            .conn()
            .query_row("SELECT MAX(created_at) FROM backups", [], |row| row.get(0))?;
        Ok(at)
    }

    /// Count snapshots
    pub fn count(&self) -> Result<u32> {
        let count: i64 =
            self.db
                .conn()
                .query_row("SELECT COUNT(*) FROM backups", [], |row| row.get(0))?;
        Ok(count as u32)
    }

    /// Prune snapshots older than the cutoff, always keeping the newest one
    pub fn prune_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let deleted = self.db.conn().execute(
            r#"
            DELETE FROM backups
            WHERE created_at < ?1
              AND id NOT IN (
                  SELECT id FROM backups
                  ORDER BY created_at DESC, id DESC
                  LIMIT 1
              )
            "#,
            [cutoff_ms],
        )?;

        if deleted > 0 {
            tracing::info!("Pruned {} old backup(s)", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questa_core::{Role, TransactionKind};
    use tempfile::NamedTempFile;

    fn test_db() -> Database {
        let file = NamedTempFile::new().unwrap();
        Database::open(file.path()).unwrap()
    }

    fn sample_profile(balance: i64) -> Profile {
        let mut profile = Profile::new("p1", "Ava", Role::Ward);
        profile.balance = balance;
        profile.total_earned = balance;
        profile
    }

    #[test]
    fn test_save_and_latest_round_trip() {
        let db = test_db();
        let store = BackupStore::new(&db);

        let txs = vec![TransactionRecord::new(
            "p1",
            TransactionKind::Earn,
            40,
            "chores quest",
        )];
        store
            .save(&sample_profile(40), &txs, BackupReason::Scheduled)
            .unwrap();

        let snapshot = store.latest().unwrap().unwrap();
        assert_eq!(snapshot.profile.balance, 40);
        assert_eq!(snapshot.transactions.len(), 1);
        assert_eq!(snapshot.reason, BackupReason::Scheduled);
    }

    #[test]
    fn test_latest_prefers_newest() {
        let db = test_db();
        let store = BackupStore::new(&db);

        store
            .save(&sample_profile(10), &[], BackupReason::Scheduled)
            .unwrap();
        store
            .save(&sample_profile(40), &[], BackupReason::LargeTransaction)
            .unwrap();

        let snapshot = store.latest().unwrap().unwrap();
        assert_eq!(snapshot.profile.balance, 40);
        assert_eq!(snapshot.reason, BackupReason::LargeTransaction);
    }

    #[test]
    fn test_no_backup_returns_none() {
        let db = test_db();
        let store = BackupStore::new(&db);
        assert!(store.latest().unwrap().is_none());
        assert!(store.last_backup_at().unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let db = test_db();
        let store = BackupStore::new(&db);

        for balance in [10, 20, 30] {
            store
                .save(&sample_profile(balance), &[], BackupReason::Scheduled)
                .unwrap();
        }

        // Cutoff in the future: everything is "old", but the newest survives
        let future = chrono::Utc::now().timestamp_millis() + 1_000;
        let deleted = store.prune_older_than(future).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.latest().unwrap().unwrap().profile.balance, 30);
    }
}
