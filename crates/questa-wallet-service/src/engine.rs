//! Wallet engine
//!
//! Orchestrates every balance mutation: validates, applies the ledger
//! arithmetic, commits online or queues offline, mirrors confirmed remote
//! state, and folds realtime pushes back into the local view.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use questa_core::{
    apply_to_profile, BackupReason, BalanceConfidence, Error, Profile, ProfileChanges,
    RemoteLedger, Result, TransactionKind, TransactionRecord,
};
use questa_storage_sqlite::{BackupStore, Database, QueueStorage};

use crate::cancel::CancelToken;
use crate::config::WalletConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::storage_err;

/// Shared handle to the on-device database
pub type SharedDb = Arc<Mutex<Database>>;

/// Aggregate offline status surfaced to the UI
#[derive(Debug, Clone, serde::Serialize)]
pub struct WalletStatus {
    /// Entries in the local queue, synced or not
    pub queue_length: u32,
    /// Entries still awaiting remote confirmation
    pub unsynced_count: u32,
    /// Current connectivity state
    pub is_online: bool,
    /// A drain is in flight
    pub is_syncing: bool,
    /// Whether the cached balance mirrors a committed remote state
    pub confidence: BalanceConfidence,
}

struct LocalState {
    profile: Option<Profile>,
    confidence: BalanceConfidence,
    recent: Vec<TransactionRecord>,
}

pub(crate) struct EngineInner {
    pub(crate) profile_id: String,
    pub(crate) remote: Arc<dyn RemoteLedger>,
    pub(crate) db: SharedDb,
    pub(crate) connectivity: ConnectivityMonitor,
    pub(crate) config: WalletConfig,
    state: RwLock<LocalState>,
    syncing: AtomicBool,
}

/// The wallet engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct WalletEngine {
    inner: Arc<EngineInner>,
}

impl WalletEngine {
    /// Create an engine with explicit collaborator handles
    pub fn new(
        profile_id: impl Into<String>,
        remote: Arc<dyn RemoteLedger>,
        db: SharedDb,
        connectivity: ConnectivityMonitor,
        config: WalletConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                profile_id: profile_id.into(),
                remote,
                db,
                connectivity,
                config,
                state: RwLock::new(LocalState {
                    profile: None,
                    confidence: BalanceConfidence::Confirmed,
                    recent: Vec::new(),
                }),
                syncing: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn parts(&self) -> &EngineInner {
        &self.inner
    }

    /// Startup: sweep confirmed-but-unremoved queue entries, then pull the
    /// authoritative state if reachable
    pub async fn bootstrap(&self) -> Result<()> {
        let swept = {
            let db = self.inner.db.lock();
            QueueStorage::new(&db).sweep_synced().map_err(storage_err)?
        };
        if swept > 0 {
            tracing::info!("Swept {} confirmed queue entries from a prior run", swept);
        }

        if self.inner.connectivity.is_online() {
            self.refresh_balance().await?;
        }
        Ok(())
    }

    /// Seed the profile from a cached authentication state (offline start)
    pub fn attach_profile(&self, profile: Profile) {
        let mut state = self.inner.state.write();
        state.profile = Some(profile);
        state.confidence = BalanceConfidence::Confirmed;
    }

    /// The locally known profile
    pub fn profile(&self) -> Result<Profile> {
        self.inner
            .state
            .read()
            .profile
            .clone()
            .ok_or_else(|| Error::Validation("no authenticated profile loaded".to_string()))
    }

    /// The locally known balance
    pub fn balance(&self) -> Result<i64> {
        Ok(self.profile()?.balance)
    }

    /// Recently seen transactions, newest first
    pub fn recent_transactions(&self) -> Vec<TransactionRecord> {
        self.inner.state.read().recent.clone()
    }

    /// Record a quest reward
    pub async fn earn(
        &self,
        amount: i64,
        description: &str,
        proof_ref: Option<&str>,
    ) -> Result<()> {
        self.commit(TransactionKind::Earn, amount, description, proof_ref, None)
            .await
    }

    /// Record a usage charge
    pub async fn spend(&self, amount: i64, description: &str, app_tag: Option<&str>) -> Result<()> {
        self.commit(TransactionKind::Spend, amount, description, None, app_tag)
            .await
    }

    /// Credit back a failed charge without inflating the earned statistic
    pub async fn refund(&self, amount: i64, description: &str) -> Result<()> {
        self.commit(TransactionKind::Refund, amount, description, None, None)
            .await
    }

    /// Re-pull the authoritative profile and recent transactions.
    ///
    /// Unsynced queue entries are re-applied on top of the fetched profile
    /// so the UI never sees a balance older than its own writes.
    pub async fn refresh_balance(&self) -> Result<()> {
        let mut profile = self.inner.remote.get_profile(&self.inner.profile_id).await?;
        let recent = self
            .inner
            .remote
            .get_transactions(&self.inner.profile_id, self.inner.config.recent_tx_limit)
            .await?;

        let pending = {
            let db = self.inner.db.lock();
            QueueStorage::new(&db)
                .unsynced_in_order()
                .map_err(storage_err)?
        };

        let mut confidence = BalanceConfidence::Confirmed;
        for entry in &pending {
            if let Err(e) =
                apply_to_profile(&mut profile, entry.transaction.kind, entry.transaction.amount)
            {
                tracing::warn!(
                    "Queued entry {} no longer applies cleanly: {}",
                    entry.local_id,
                    e
                );
            }
            confidence = BalanceConfidence::Optimistic;
        }

        let mut state = self.inner.state.write();
        state.profile = Some(profile);
        state.confidence = confidence;
        state.recent = recent;
        tracing::debug!(
            "Balance refreshed ({} pending offline entr{})",
            pending.len(),
            if pending.len() == 1 { "y" } else { "ies" }
        );
        Ok(())
    }

    /// Fold a realtime profile push into local state.
    ///
    /// The newer of {local value, pushed value} by timestamp wins.
    pub fn apply_profile_push(&self, pushed: Profile) {
        let mut state = self.inner.state.write();
        match &state.profile {
            Some(local) if local.updated_at > pushed.updated_at => {
                tracing::debug!("Ignoring stale profile push");
            }
            _ => {
                state.profile = Some(pushed);
                state.confidence = BalanceConfidence::Confirmed;
            }
        }
    }

    /// Fold a realtime transaction insert into the recent cache
    pub fn apply_transaction_push(&self, tx: TransactionRecord) {
        let mut state = self.inner.state.write();
        if let Some(id) = tx.id.as_deref() {
            if state
                .recent
                .iter()
                .any(|known| known.id.as_deref() == Some(id))
            {
                return;
            }
        }
        state.recent.insert(0, tx);
        let limit = self.inner.config.recent_tx_limit as usize;
        state.recent.truncate(limit);
    }

    /// Forward realtime pushes into the engine until cancelled
    pub async fn run_push_listener(&self, cancel: CancelToken) -> Result<()> {
        let mut profiles = self
            .inner
            .remote
            .subscribe_profile(&self.inner.profile_id)
            .await?;
        let mut transactions = self
            .inner
            .remote
            .subscribe_transactions(&self.inner.profile_id)
            .await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                pushed = profiles.recv() => match pushed {
                    Some(profile) => self.apply_profile_push(profile),
                    None => break,
                },
                pushed = transactions.recv() => match pushed {
                    Some(tx) => self.apply_transaction_push(tx),
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Aggregate offline status for the UI
    pub fn status(&self) -> Result<WalletStatus> {
        let (queue_length, unsynced_count) = {
            let db = self.inner.db.lock();
            let queue = QueueStorage::new(&db);
            (
                queue.len().map_err(storage_err)?,
                queue.unsynced_count().map_err(storage_err)?,
            )
        };

        Ok(WalletStatus {
            queue_length,
            unsynced_count,
            is_online: self.inner.connectivity.is_online(),
            is_syncing: self.inner.syncing.load(Ordering::Acquire),
            confidence: self.inner.state.read().confidence,
        })
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.inner.syncing.store(syncing, Ordering::Release);
    }

    async fn commit(
        &self,
        kind: TransactionKind,
        amount: i64,
        description: &str,
        proof_ref: Option<&str>,
        app_tag: Option<&str>,
    ) -> Result<()> {
        if amount <= 0 {
            return Err(Error::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if description.trim().is_empty() {
            return Err(Error::Validation("description must not be empty".to_string()));
        }

        let mut updated = self.profile()?;
        apply_to_profile(&mut updated, kind, amount)?;
        updated.updated_at = chrono::Utc::now().timestamp_millis();

        let mut tx = TransactionRecord::new(&self.inner.profile_id, kind, amount, description);
        if let Some(proof) = proof_ref {
            tx = tx.with_proof(proof);
        }
        if let Some(app) = app_tag {
            tx = tx.with_app_tag(app);
        }

        let mut remote_failure = None;
        if self.inner.connectivity.is_online() {
            match self.inner.remote.create_transaction(&tx).await {
                Ok(committed) => {
                    // The transaction is durable remotely; a failed profile
                    // write must not re-enter the queue or the entry would
                    // commit twice.
                    match self
                        .inner
                        .remote
                        .update_profile(&self.inner.profile_id, ProfileChanges::from_profile(&updated))
                        .await
                    {
                        Ok(stored) => self.store_local(stored, committed, BalanceConfidence::Confirmed),
                        Err(e) => {
                            tracing::warn!("Profile update failed after commit: {}", e);
                            self.store_local(updated, committed, BalanceConfidence::Optimistic);
                        }
                    }
                    self.maybe_backup(amount);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Online commit failed, falling back to queue: {}", e);
                    remote_failure = Some(e);
                }
            }
        }

        // Offline path: optimistic local apply + durable enqueue
        let enqueued = {
            let db = self.inner.db.lock();
            QueueStorage::new(&db).enqueue(&tx)
        };
        match enqueued {
            Ok(local_id) => {
                tracing::debug!(
                    "Offline {}: {} tokens queued as {}",
                    kind.as_str(),
                    amount,
                    local_id
                );
                self.store_local(updated, tx, BalanceConfidence::Optimistic);
                self.maybe_backup(amount);
                Ok(())
            }
            Err(enqueue_err) => Err(Error::Persistence(match remote_failure {
                Some(remote_err) => format!(
                    "online commit failed ({}) and offline enqueue failed ({})",
                    remote_err, enqueue_err
                ),
                None => format!("offline enqueue failed: {}", enqueue_err),
            })),
        }
    }

    fn store_local(&self, profile: Profile, tx: TransactionRecord, confidence: BalanceConfidence) {
        let mut state = self.inner.state.write();
        state.profile = Some(profile);
        state.confidence = confidence;
        state.recent.insert(0, tx);
        let limit = self.inner.config.recent_tx_limit as usize;
        state.recent.truncate(limit);
    }

    /// Snapshot the ledger in the background after a large mutation.
    /// Must not block the caller.
    fn maybe_backup(&self, amount: i64) {
        if amount < self.inner.config.backup_threshold {
            return;
        }
        let Ok(profile) = self.profile() else { return };
        let recent = self.recent_transactions();
        let db = Arc::clone(&self.inner.db);

        tokio::spawn(async move {
            let db = db.lock();
            if let Err(e) =
                BackupStore::new(&db).save(&profile, &recent, BackupReason::LargeTransaction)
            {
                tracing::warn!("Large-transaction backup failed: {}", e);
            }
        });
    }
}
