//! Offline transaction queue with retry/backoff for SQLITE_BUSY
//!
//! Pending transactions are appended here when the remote store is
//! unreachable and drained in strict insertion order once connectivity
//! returns. Entries survive process death.

use crate::{Database, Error, Result};
use questa_core::{QueuedTransaction, TransactionKind, TransactionRecord};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// Queue storage operations with retry logic
pub struct QueueStorage<'a> {
    db: &'a Database,
}

impl<'a> QueueStorage<'a> {
    /// Create new queue storage
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a pending transaction; returns the locally generated id
    pub fn enqueue(&self, tx: &TransactionRecord) -> Result<String> {
        let local_id = uuid::Uuid::new_v4().to_string();
        let queued_at = chrono::Utc::now().timestamp_millis();

        self.execute_with_retry(|| {
            self.db.conn().execute(
                r#"
                INSERT INTO queued_transactions
                    (local_id, profile_id, kind, amount, description,
                     proof_ref, app_tag, created_at, queued_at, synced)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)
                "#,
                params![
                    local_id,
                    tx.profile_id,
                    tx.kind.as_str(),
                    tx.amount,
                    tx.description,
                    tx.proof_ref,
                    tx.app_tag,
                    tx.created_at,
                    queued_at,
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(
            "Enqueued offline {} of {} tokens as {}",
            tx.kind.as_str(),
            tx.amount,
            local_id
        );
        Ok(local_id)
    }

    /// Unsynced entries in original insertion order (FIFO)
    pub fn unsynced_in_order(&self) -> Result<Vec<QueuedTransaction>> {
        self.query_with_retry(|| {
            let mut stmt = self.db.conn().prepare(
                r#"
                SELECT local_id, profile_id, kind, amount, description,
                       proof_ref, app_tag, created_at, queued_at, synced
                FROM queued_transactions
                WHERE synced = 0
                ORDER BY rowid ASC
                "#,
            )?;

            let rows = stmt.query_map([], row_to_queued)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    /// Look up a single entry by local id
    pub fn get(&self, local_id: &str) -> Result<Option<QueuedTransaction>> {
        self.query_with_retry(|| {
            let entry = self
                .db
                .conn()
                .query_row(
                    r#"
                    SELECT local_id, profile_id, kind, amount, description,
                           proof_ref, app_tag, created_at, queued_at, synced
                    FROM queued_transactions
                    WHERE local_id = ?1
                    "#,
                    [local_id],
                    row_to_queued,
                )
                .optional()?;
            Ok(entry)
        })
    }

    /// Mark an entry as confirmed by the remote store
    pub fn mark_synced(&self, local_id: &str) -> Result<()> {
        self.execute_with_retry(|| {
            let changed = self.db.conn().execute(
                "UPDATE queued_transactions SET synced = 1 WHERE local_id = ?1",
                [local_id],
            )?;
            if changed == 0 {
                return Err(Error::NotFound(format!("queue entry {}", local_id)));
            }
            Ok(())
        })
    }

    /// Remove a confirmed entry
    pub fn remove(&self, local_id: &str) -> Result<()> {
        self.execute_with_retry(|| {
            self.db.conn().execute(
                "DELETE FROM queued_transactions WHERE local_id = ?1",
                [local_id],
            )?;
            Ok(())
        })
    }

    /// Total entries, synced or not
    pub fn len(&self) -> Result<u32> {
        self.query_with_retry(|| {
            let count: i64 = self.db.conn().query_row(
                "SELECT COUNT(*) FROM queued_transactions",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Whether the queue holds no entries at all
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Entries still awaiting remote confirmation
    pub fn unsynced_count(&self) -> Result<u32> {
        self.query_with_retry(|| {
            let count: i64 = self.db.conn().query_row(
                "SELECT COUNT(*) FROM queued_transactions WHERE synced = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Drop entries already confirmed and removed from the drain path.
    ///
    /// Covers the crash window between confirmation and removal: entries
    /// marked synced but never deleted are swept here at startup.
    pub fn sweep_synced(&self) -> Result<usize> {
        self.execute_count_with_retry(|| {
            Ok(self
                .db
                .conn()
                .execute("DELETE FROM queued_transactions WHERE synced = 1", [])?)
        })
    }

    /// Execute with retry logic for SQLITE_BUSY
    fn execute_with_retry<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(()) => return Ok(()),
                Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    let backoff = calculate_backoff(attempts);
                    tracing::debug!(
                        "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                        attempts,
                        MAX_BUSY_RETRIES,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn execute_count_with_retry<F>(&self, mut f: F) -> Result<usize>
    where
        F: FnMut() -> Result<usize>,
    {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(count) => return Ok(count),
                Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(calculate_backoff(attempts)));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Query with retry logic for SQLITE_BUSY
    fn query_with_retry<F, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempts = 0;

        loop {
            match f() {
                Ok(result) => return Ok(result),
                Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    let backoff = calculate_backoff(attempts);
                    tracing::debug!(
                        "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                        attempts,
                        MAX_BUSY_RETRIES,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn row_to_queued(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedTransaction> {
    let kind_str: String = row.get(2)?;
    let kind = TransactionKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown transaction kind: {}", kind_str).into(),
        )
    })?;

    Ok(QueuedTransaction {
        local_id: row.get(0)?,
        transaction: TransactionRecord {
            id: None,
            profile_id: row.get(1)?,
            kind,
            amount: row.get(3)?,
            description: row.get(4)?,
            proof_ref: row.get(5)?,
            app_tag: row.get(6)?,
            created_at: row.get(7)?,
        },
        queued_at: row.get(8)?,
        synced: row.get::<_, i64>(9)? != 0,
    })
}

/// Check if error is SQLITE_BUSY
fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use questa_core::TransactionKind;
    use tempfile::NamedTempFile;

    fn test_db() -> Database {
        let file = NamedTempFile::new().unwrap();
        Database::open(file.path()).unwrap()
    }

    fn sample_tx(amount: i64, description: &str) -> TransactionRecord {
        TransactionRecord::new("p1", TransactionKind::Spend, amount, description)
            .with_app_tag("video")
    }

    #[test]
    fn test_enqueue_and_read_back() {
        let db = test_db();
        let queue = QueueStorage::new(&db);

        let local_id = queue.enqueue(&sample_tx(5, "video usage")).unwrap();
        let entry = queue.get(&local_id).unwrap().unwrap();

        assert_eq!(entry.local_id, local_id);
        assert!(!entry.synced);
        assert_eq!(entry.transaction.amount, 5);
        assert_eq!(entry.transaction.kind, TransactionKind::Spend);
        assert_eq!(entry.transaction.app_tag.as_deref(), Some("video"));
        assert!(entry.transaction.id.is_none());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let db = test_db();
        let queue = QueueStorage::new(&db);

        for i in 1..=4 {
            queue.enqueue(&sample_tx(i, &format!("usage {i}"))).unwrap();
        }

        let entries = queue.unsynced_in_order().unwrap();
        let amounts: Vec<i64> = entries.iter().map(|e| e.transaction.amount).collect();
        assert_eq!(amounts, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_mark_synced_removes_from_unsynced() {
        let db = test_db();
        let queue = QueueStorage::new(&db);

        let id1 = queue.enqueue(&sample_tx(1, "a")).unwrap();
        queue.enqueue(&sample_tx(2, "b")).unwrap();

        queue.mark_synced(&id1).unwrap();
        assert_eq!(queue.unsynced_count().unwrap(), 1);
        assert_eq!(queue.len().unwrap(), 2);

        queue.remove(&id1).unwrap();
        assert_eq!(queue.len().unwrap(), 1);
    }

    #[test]
    fn test_mark_synced_unknown_entry_fails() {
        let db = test_db();
        let queue = QueueStorage::new(&db);
        assert!(matches!(
            queue.mark_synced("no-such-id"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_sweep_synced() {
        let db = test_db();
        let queue = QueueStorage::new(&db);

        let id1 = queue.enqueue(&sample_tx(1, "a")).unwrap();
        queue.enqueue(&sample_tx(2, "b")).unwrap();
        queue.mark_synced(&id1).unwrap();

        // Simulates startup after a crash between confirm and remove
        assert_eq!(queue.sweep_synced().unwrap(), 1);
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.unsynced_count().unwrap(), 1);
    }

    #[test]
    fn test_queue_survives_reopen() {
        let file = NamedTempFile::new().unwrap();
        {
            let db = Database::open(file.path()).unwrap();
            QueueStorage::new(&db)
                .enqueue(&sample_tx(7, "persisted"))
                .unwrap();
        }

        let db = Database::open(file.path()).unwrap();
        let entries = QueueStorage::new(&db).unsynced_in_order().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transaction.amount, 7);
    }

    #[test]
    fn test_calculate_backoff_bounded() {
        assert!(calculate_backoff(1) >= BASE_BACKOFF_MS);
        assert!(calculate_backoff(10) <= MAX_BACKOFF_MS);
    }
}
