//! Offline queue drain
//!
//! Promotes queued transactions to the remote store in strict insertion
//! order once connectivity returns. A failed entry blocks everything
//! behind it; re-sending later entries first would reorder the account's
//! history. Retried on every became-online edge and on a coarse timer
//! while online and non-empty, with no maximum retry count.

use std::time::Duration;
use tokio::time::MissedTickBehavior;

use questa_core::{apply_to_profile, Error, ProfileChanges, QueuedTransaction, Result};
use questa_storage_sqlite::QueueStorage;

use crate::cancel::CancelToken;
use crate::engine::WalletEngine;

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DrainOutcome {
    /// Entries confirmed and removed
    pub success: u32,
    /// Entries left pending behind a failure
    pub failed: u32,
}

impl WalletEngine {
    /// Drain the offline queue.
    ///
    /// Idempotent: already-confirmed entries are skipped, and draining an
    /// empty queue is a no-op returning `{success: 0, failed: 0}`. A
    /// drain that empties the queue finishes with a balance refresh to
    /// settle any server-side divergence in the server's favor.
    pub async fn drain_queue(&self) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        if !self.parts().connectivity.is_online() {
            return outcome;
        }

        let entries = {
            let db = self.parts().db.lock();
            match QueueStorage::new(&db).unsynced_in_order() {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::error!("Failed to read the offline queue: {}", e);
                    return outcome;
                }
            }
        };
        if entries.is_empty() {
            return outcome;
        }

        self.set_syncing(true);
        let total = entries.len() as u32;

        for entry in &entries {
            match self.push_entry(entry).await {
                Ok(()) => {
                    let db = self.parts().db.lock();
                    if let Err(e) = QueueStorage::new(&db).remove(&entry.local_id) {
                        tracing::warn!("Failed to clear drained entry {}: {}", entry.local_id, e);
                    }
                    outcome.success += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Drain stopped at entry {} ({} behind it): {}",
                        entry.local_id,
                        total - outcome.success - 1,
                        e
                    );
                    outcome.failed = total - outcome.success;
                    break;
                }
            }
        }
        self.set_syncing(false);

        if outcome.failed == 0 && outcome.success > 0 {
            if let Err(e) = self.refresh_balance().await {
                tracing::warn!("Post-drain balance refresh failed: {}", e);
            }
        }

        tracing::info!(
            "Queue drain finished: {} synced, {} pending",
            outcome.success,
            outcome.failed
        );
        outcome
    }

    async fn push_entry(&self, entry: &QueuedTransaction) -> Result<()> {
        let inner = self.parts();

        let committed = inner
            .remote
            .create_transaction(&entry.transaction)
            .await
            .map_err(|e| Error::Sync(format!("commit failed for {}: {}", entry.local_id, e)))?;

        // Durably mark the entry before the profile write: a retry after a
        // crash here must never commit the transaction twice.
        {
            let db = inner.db.lock();
            if let Err(e) = QueueStorage::new(&db).mark_synced(&entry.local_id) {
                tracing::warn!("Failed to mark {} synced: {}", entry.local_id, e);
            }
        }

        let mut profile = inner
            .remote
            .get_profile(&inner.profile_id)
            .await
            .map_err(|e| Error::Sync(e.to_string()))?;
        apply_to_profile(&mut profile, entry.transaction.kind, entry.transaction.amount)
            .map_err(|e| Error::Sync(format!("entry {} no longer applies: {}", entry.local_id, e)))?;
        profile.updated_at = chrono::Utc::now().timestamp_millis();

        inner
            .remote
            .update_profile(&inner.profile_id, ProfileChanges::from_profile(&profile))
            .await
            .map_err(|e| Error::Sync(e.to_string()))?;

        tracing::debug!(
            "Promoted {} to remote id {:?}",
            entry.local_id,
            committed.id
        );
        Ok(())
    }

    pub(crate) fn pending_unsynced(&self) -> u32 {
        let db = self.parts().db.lock();
        QueueStorage::new(&db).unsynced_count().unwrap_or_else(|e| {
            tracing::warn!("Failed to count pending entries: {}", e);
            0
        })
    }
}

/// Background drain loop driven by connectivity edges and a retry timer
pub struct SyncDrainer {
    engine: WalletEngine,
    cancel: CancelToken,
}

impl SyncDrainer {
    /// Create a drainer for the given engine
    pub fn new(engine: WalletEngine, cancel: CancelToken) -> Self {
        Self { engine, cancel }
    }

    /// Spawn the drain loop onto the runtime
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until cancelled
    pub async fn run(self) {
        let mut online_rx = self.engine.parts().connectivity.subscribe();
        let mut was_online = self.engine.parts().connectivity.is_online();

        let retry_secs = self.engine.parts().config.drain_retry_secs.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(retry_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        tracing::info!("Came online: draining offline queue");
                        self.engine.drain_queue().await;
                    }
                    was_online = online;
                }
                _ = interval.tick() => {
                    if self.engine.parts().connectivity.is_online()
                        && self.engine.pending_unsynced() > 0
                    {
                        self.engine.drain_queue().await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletConfig;
    use crate::connectivity::ConnectivityMonitor;
    use crate::engine::SharedDb;
    use parking_lot::Mutex;
    use questa_core::{MockRemoteLedger, Profile, Role};
    use questa_storage_sqlite::Database;
    use std::sync::Arc;

    fn shared_db() -> SharedDb {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    fn offline_setup(balance: i64) -> (WalletEngine, MockRemoteLedger, ConnectivityMonitor) {
        let remote = MockRemoteLedger::new();
        let mut profile = Profile::new("p1", "Ava", Role::Ward);
        profile.balance = balance;
        profile.total_earned = balance;
        remote.insert_profile(profile.clone());
        remote.set_reachable(false);

        let connectivity = ConnectivityMonitor::new(false);
        let engine = WalletEngine::new(
            "p1",
            Arc::new(remote.clone()),
            shared_db(),
            connectivity.clone(),
            WalletConfig::default(),
        );
        engine.attach_profile(profile);
        (engine, remote, connectivity)
    }

    fn reconnect(remote: &MockRemoteLedger, connectivity: &ConnectivityMonitor) {
        remote.set_reachable(true);
        connectivity.set_online(true);
    }

    #[tokio::test]
    async fn test_drain_empty_queue_is_noop() {
        let (engine, remote, connectivity) = offline_setup(20);
        reconnect(&remote, &connectivity);

        let outcome = engine.drain_queue().await;
        assert_eq!(outcome, DrainOutcome::default());
    }

    #[tokio::test]
    async fn test_enqueue_then_drain_matches_online_result() {
        let (engine, remote, connectivity) = offline_setup(20);

        engine.earn(10, "homework quest", None).await.unwrap();
        engine.spend(5, "video usage", Some("video")).await.unwrap();

        reconnect(&remote, &connectivity);
        let outcome = engine.drain_queue().await;
        assert_eq!(outcome, DrainOutcome { success: 2, failed: 0 });

        // Final remote balance equals the local optimistic one: +10 -5
        let stored = remote.stored_profile("p1").unwrap();
        assert_eq!(stored.balance, 25);
        assert_eq!(stored.total_earned, 30);
        assert_eq!(stored.total_spent, 5);
        assert_eq!(engine.balance().unwrap(), 25);

        // Causal order preserved
        let committed = remote.committed_transactions();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].amount, 10);
        assert_eq!(committed[1].amount, 5);

        let status = engine.status().unwrap();
        assert_eq!(status.unsynced_count, 0);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let (engine, remote, connectivity) = offline_setup(20);
        engine.earn(10, "homework quest", None).await.unwrap();
        reconnect(&remote, &connectivity);

        assert_eq!(engine.drain_queue().await.success, 1);
        // A second drain finds nothing to send
        assert_eq!(engine.drain_queue().await, DrainOutcome::default());
        assert_eq!(remote.committed_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_entry_blocks_the_rest() {
        let (engine, remote, connectivity) = offline_setup(20);
        engine.earn(10, "homework quest", None).await.unwrap();
        engine.spend(5, "video usage", None).await.unwrap();

        reconnect(&remote, &connectivity);
        remote.fail_next_creates(1);

        let outcome = engine.drain_queue().await;
        assert_eq!(outcome, DrainOutcome { success: 0, failed: 2 });
        assert!(remote.committed_transactions().is_empty());
        assert_eq!(engine.status().unwrap().unsynced_count, 2);

        // The retry drains both, in order
        let outcome = engine.drain_queue().await;
        assert_eq!(outcome, DrainOutcome { success: 2, failed: 0 });
        assert_eq!(remote.stored_profile("p1").unwrap().balance, 25);
    }

    #[tokio::test]
    async fn test_queue_survives_restart_and_drains() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let remote = MockRemoteLedger::new();
        let mut profile = Profile::new("p1", "Ava", Role::Ward);
        profile.balance = 20;
        profile.total_earned = 20;
        remote.insert_profile(profile.clone());
        remote.set_reachable(false);

        // First process: spend offline, then die
        {
            let db: SharedDb = Arc::new(Mutex::new(Database::open(file.path()).unwrap()));
            let engine = WalletEngine::new(
                "p1",
                Arc::new(remote.clone()),
                db,
                ConnectivityMonitor::new(false),
                WalletConfig::default(),
            );
            engine.attach_profile(profile.clone());
            engine.spend(5, "video usage", Some("video")).await.unwrap();
        }

        // Next launch: the entry is still queued and drains on reconnect
        let db: SharedDb = Arc::new(Mutex::new(Database::open(file.path()).unwrap()));
        let connectivity = ConnectivityMonitor::new(false);
        let engine = WalletEngine::new(
            "p1",
            Arc::new(remote.clone()),
            db,
            connectivity.clone(),
            WalletConfig::default(),
        );
        engine.attach_profile(profile);
        engine.bootstrap().await.unwrap();
        assert_eq!(engine.status().unwrap().unsynced_count, 1);

        reconnect(&remote, &connectivity);
        let outcome = engine.drain_queue().await;
        assert_eq!(outcome, DrainOutcome { success: 1, failed: 0 });
        assert_eq!(remote.stored_profile("p1").unwrap().balance, 15);
    }

    #[tokio::test]
    async fn test_drainer_drains_on_online_edge() {
        let (engine, remote, connectivity) = offline_setup(20);
        engine.spend(4, "video usage", None).await.unwrap();

        let cancel = CancelToken::new();
        let handle = SyncDrainer::new(engine.clone(), cancel.clone()).spawn();

        reconnect(&remote, &connectivity);

        let mut drained = false;
        for _ in 0..200 {
            if engine.status().unwrap().unsynced_count == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(drained, "drainer did not react to the online edge");
        assert_eq!(remote.stored_profile("p1").unwrap().balance, 16);

        cancel.cancel();
        handle.await.unwrap();
    }
}
