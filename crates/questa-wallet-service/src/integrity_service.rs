//! Integrity checks, backups, and corruption recovery
//!
//! Audits profile + transaction snapshots against the ledger invariants,
//! keeps rolling backups, and repairs corrupted state: local correction
//! where the damage is arithmetic, backup restore where it is structural.
//! Every detected or corrected corruption is reported to the guardian,
//! so silent repair never happens invisibly to the account owner.

use std::sync::Arc;

use questa_core::{
    check_snapshot, recompute_totals, validate_profile, BackupReason, BackupSnapshot,
    GuardianNotifier, IntegrityReport, Profile, Result, Severity, TransactionRecord,
};
use questa_storage_sqlite::BackupStore;

use crate::cancel::CancelToken;
use crate::config::BackupConfig;
use crate::engine::{SharedDb, WalletEngine};
use crate::storage_err;

/// How many snapshots the restore path scans for a valid candidate
const RESTORE_SCAN_LIMIT: u32 = 10;

/// Result of a corruption-recovery attempt
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RecoveryOutcome {
    /// The ledger was brought back to a valid state
    pub recovered: bool,
    /// Recovery went through a backup restore rather than local correction
    pub backup_restored: bool,
}

/// Integrity and backup service
pub struct IntegrityService {
    db: SharedDb,
    notifier: Arc<dyn GuardianNotifier>,
    config: BackupConfig,
}

impl IntegrityService {
    /// Create the service with explicit collaborator handles
    pub fn new(db: SharedDb, notifier: Arc<dyn GuardianNotifier>, config: BackupConfig) -> Self {
        Self {
            db,
            notifier,
            config,
        }
    }

    /// Run both validators over a full snapshot and aggregate
    pub fn perform_integrity_check(
        &self,
        profile: &Profile,
        transactions: &[TransactionRecord],
    ) -> IntegrityReport {
        let backup_available = {
            let db = self.db.lock();
            BackupStore::new(&db).count().map(|c| c > 0).unwrap_or(false)
        };
        let report = check_snapshot(profile, transactions, backup_available);
        if !report.is_valid {
            tracing::warn!("Integrity check failed: {}", report.summary());
        }
        report
    }

    /// Persist a backup snapshot.
    ///
    /// Scheduled backups are skipped while a recent one exists; the
    /// opportunistic reasons (large transaction, pre-recovery, manual)
    /// always write. Returns whether a snapshot was written.
    pub fn create_backup(
        &self,
        profile: &Profile,
        transactions: &[TransactionRecord],
        reason: BackupReason,
    ) -> Result<bool> {
        let db = self.db.lock();
        let store = BackupStore::new(&db);

        if reason == BackupReason::Scheduled {
            let min_gap_ms = i64::from(self.config.interval_hours) * 3_600_000;
            if let Some(last) = store.last_backup_at().map_err(storage_err)? {
                let age = chrono::Utc::now().timestamp_millis() - last;
                if age < min_gap_ms {
                    tracing::debug!("Skipping scheduled backup: last one is {}ms old", age);
                    return Ok(false);
                }
            }
        }

        store
            .save(profile, transactions, reason)
            .map_err(storage_err)?;
        Ok(true)
    }

    /// Most recent snapshot that still passes validation, or None
    pub fn restore_from_backup(&self) -> Result<Option<BackupSnapshot>> {
        let snapshots = {
            let db = self.db.lock();
            BackupStore::new(&db)
                .list_newest(RESTORE_SCAN_LIMIT)
                .map_err(storage_err)?
        };

        for snapshot in snapshots {
            if snapshot_is_valid(&snapshot) {
                return Ok(Some(snapshot));
            }
            tracing::warn!(
                "Skipping invalid backup from {} during restore",
                snapshot.created_at
            );
        }
        Ok(None)
    }

    /// Prune snapshots beyond the retention window
    pub fn cleanup_old_backups(&self) -> Result<usize> {
        let cutoff =
            chrono::Utc::now().timestamp_millis() - i64::from(self.config.retention_days) * 86_400_000;
        let db = self.db.lock();
        BackupStore::new(&db)
            .prune_older_than(cutoff)
            .map_err(storage_err)
    }

    /// One audit pass over the engine's current state.
    ///
    /// Valid ledgers get a scheduled backup (rate-limited to the
    /// configured interval); corrupt ones go through recovery, and the
    /// repaired profile is folded back into the engine. Ends with a
    /// retention sweep.
    pub async fn audit_once(&self, engine: &WalletEngine) -> Result<IntegrityReport> {
        let profile = engine.profile()?;
        let transactions = engine.recent_transactions();

        let report = self.perform_integrity_check(&profile, &transactions);
        if report.is_valid {
            self.create_backup(&profile, &transactions, BackupReason::Scheduled)?;
        } else {
            let mut repaired = profile.clone();
            let outcome = self
                .handle_corruption(&mut repaired, &transactions, &report)
                .await?;
            if outcome.recovered {
                engine.attach_profile(repaired);
            }
        }

        self.cleanup_old_backups()?;
        Ok(report)
    }

    /// Run audits on a fixed period until cancelled
    pub async fn run_periodic(
        self: Arc<Self>,
        engine: WalletEngine,
        cancel: CancelToken,
        period: std::time::Duration,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.audit_once(&engine).await {
                        tracing::warn!("Periodic ledger audit failed: {}", e);
                    }
                }
            }
        }
    }

    /// Attempt to repair a corrupted snapshot in place.
    ///
    /// Restores from the most recent valid backup when one exists;
    /// otherwise clamps and recomputes from the transaction history. The
    /// guardian is notified either way.
    pub async fn handle_corruption(
        &self,
        profile: &mut Profile,
        transactions: &[TransactionRecord],
        report: &IntegrityReport,
    ) -> Result<RecoveryOutcome> {
        // Forensic copy of the corrupt state. It fails validation, so the
        // restore scan below will not pick it.
        if let Err(e) = self.create_backup(profile, transactions, BackupReason::PreRecovery) {
            tracing::warn!("Pre-recovery backup failed: {}", e);
        }

        let mut outcome = RecoveryOutcome::default();

        if let Some(snapshot) = self.restore_from_backup()? {
            tracing::info!(
                "Restoring ledger from backup taken at {} (balance {})",
                snapshot.created_at,
                snapshot.profile.balance
            );
            *profile = snapshot.profile;
            outcome.recovered = true;
            outcome.backup_restored = true;
        } else if report.has_unrecoverable() {
            // Nothing to restore and the damage is structural; clamp to a
            // safe minimum so the account keeps functioning.
            clamp_to_safe_minimum(profile, transactions);
            outcome.recovered = false;
        } else {
            clamp_to_safe_minimum(profile, transactions);
            outcome.recovered = validate_profile(profile)
                .iter()
                .all(|issue| issue.severity == Severity::Low);
        }

        let message = recovery_message(report, &outcome);
        if let Err(e) = self.notifier.notify(&message).await {
            tracing::error!("Guardian notification failed: {}", e);
        }

        Ok(outcome)
    }
}

fn snapshot_is_valid(snapshot: &BackupSnapshot) -> bool {
    check_snapshot(&snapshot.profile, &snapshot.transactions, false).is_valid
}

/// Rebuild the ledger head from its own audit trail, flooring at zero
fn clamp_to_safe_minimum(profile: &mut Profile, transactions: &[TransactionRecord]) {
    let totals = recompute_totals(transactions);
    if !transactions.is_empty() {
        profile.total_earned = totals.earned;
        profile.total_spent = totals.spent;
        profile.balance = totals.balance().max(0);
    } else {
        profile.balance = profile.balance.max(0);
        profile.total_earned = profile.total_earned.max(0);
        profile.total_spent = profile.total_spent.max(0);
    }
    profile.updated_at = chrono::Utc::now().timestamp_millis();
    tracing::info!(
        "Ledger clamped to safe values: balance={}, earned={}, spent={}",
        profile.balance,
        profile.total_earned,
        profile.total_spent
    );
}

fn recovery_message(report: &IntegrityReport, outcome: &RecoveryOutcome) -> String {
    let action = if outcome.backup_restored {
        "restored from the most recent backup"
    } else if outcome.recovered {
        "repaired from the transaction history"
    } else {
        "could not be fully repaired; please review the account"
    };
    format!(
        "Questa found a problem with the token ledger and {}. Details: {}",
        action,
        report.summary()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SharedDb;
    use parking_lot::Mutex;
    use questa_core::{MockNotifier, Role, TransactionKind};
    use questa_storage_sqlite::Database;

    fn shared_db() -> SharedDb {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    fn service(db: SharedDb, notifier: MockNotifier) -> IntegrityService {
        IntegrityService::new(db, Arc::new(notifier), BackupConfig::default())
    }

    fn healthy_profile(balance: i64) -> Profile {
        let mut profile = Profile::new("p1", "Ava", Role::Ward);
        profile.balance = balance;
        profile.total_earned = balance;
        profile
    }

    #[tokio::test]
    async fn test_check_passes_on_healthy_snapshot() {
        let svc = service(shared_db(), MockNotifier::new());
        let report = svc.perform_integrity_check(&healthy_profile(40), &[]);
        assert!(report.is_valid);
        assert!(!report.backup_available);
    }

    #[tokio::test]
    async fn test_negative_balance_restores_from_backup() {
        let db = shared_db();
        let notifier = MockNotifier::new();
        let svc = service(Arc::clone(&db), notifier.clone());

        // Known-good state: balance 40
        svc.create_backup(&healthy_profile(40), &[], BackupReason::Manual)
            .unwrap();

        // Corrupt head: balance -5
        let mut corrupt = healthy_profile(40);
        corrupt.balance = -5;
        let report = svc.perform_integrity_check(&corrupt, &[]);
        assert!(!report.is_valid);
        assert!(report.backup_available);

        let outcome = svc
            .handle_corruption(&mut corrupt, &[], &report)
            .await
            .unwrap();
        assert!(outcome.recovered);
        assert!(outcome.backup_restored);
        assert_eq!(corrupt.balance, 40);

        // Guardian always hears about it
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("restored"));
    }

    #[tokio::test]
    async fn test_corruption_without_backup_clamps_from_history() {
        let db = shared_db();
        let notifier = MockNotifier::new();
        let svc = service(Arc::clone(&db), notifier.clone());

        let txs = vec![
            TransactionRecord::new("p1", TransactionKind::Earn, 30, "quests"),
            TransactionRecord::new("p1", TransactionKind::Spend, 10, "usage"),
        ];
        let mut corrupt = healthy_profile(0);
        corrupt.balance = -7;
        corrupt.total_spent = -1;

        let report = svc.perform_integrity_check(&corrupt, &txs);
        assert!(!report.is_valid);

        let outcome = svc
            .handle_corruption(&mut corrupt, &txs, &report)
            .await
            .unwrap();
        assert!(outcome.recovered);
        assert!(!outcome.backup_restored);
        assert_eq!(corrupt.balance, 20);
        assert_eq!(corrupt.total_earned, 30);
        assert_eq!(corrupt.total_spent, 10);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_without_backup_reports_failure() {
        let notifier = MockNotifier::new();
        let svc = service(shared_db(), notifier.clone());

        let mut corrupt = healthy_profile(10);
        corrupt.id = String::new();
        let report = svc.perform_integrity_check(&corrupt, &[]);
        assert!(report.has_unrecoverable());
        assert!(!report.can_recover);

        let outcome = svc
            .handle_corruption(&mut corrupt, &[], &report)
            .await
            .unwrap();
        assert!(!outcome.recovered);
        assert!(notifier.messages()[0].contains("could not be fully repaired"));
    }

    #[tokio::test]
    async fn test_restore_skips_corrupt_snapshots() {
        let db = shared_db();
        let svc = service(Arc::clone(&db), MockNotifier::new());

        svc.create_backup(&healthy_profile(40), &[], BackupReason::Manual)
            .unwrap();
        let mut corrupt = healthy_profile(40);
        corrupt.balance = -5;
        svc.create_backup(&corrupt, &[], BackupReason::PreRecovery)
            .unwrap();

        // The newest snapshot is corrupt; restoration falls back to the
        // older valid one.
        let restored = svc.restore_from_backup().unwrap().unwrap();
        assert_eq!(restored.profile.balance, 40);
    }

    #[tokio::test]
    async fn test_scheduled_backup_rate_limited() {
        let svc = service(shared_db(), MockNotifier::new());
        let profile = healthy_profile(40);

        assert!(svc
            .create_backup(&profile, &[], BackupReason::Scheduled)
            .unwrap());
        // A second scheduled backup right away is skipped
        assert!(!svc
            .create_backup(&profile, &[], BackupReason::Scheduled)
            .unwrap());
        // Opportunistic reasons always write
        assert!(svc
            .create_backup(&profile, &[], BackupReason::LargeTransaction)
            .unwrap());
    }

    #[tokio::test]
    async fn test_audit_repairs_engine_state() {
        use crate::config::WalletConfig;
        use crate::connectivity::ConnectivityMonitor;
        use questa_core::MockRemoteLedger;

        let db = shared_db();
        let notifier = MockNotifier::new();
        let svc = service(Arc::clone(&db), notifier.clone());

        let remote = MockRemoteLedger::new();
        remote.insert_profile(healthy_profile(40));
        let engine = WalletEngine::new(
            "p1",
            Arc::new(remote),
            Arc::clone(&db),
            ConnectivityMonitor::new(true),
            WalletConfig::default(),
        );
        engine.bootstrap().await.unwrap();

        // First audit on healthy state writes the scheduled backup
        let report = svc.audit_once(&engine).await.unwrap();
        assert!(report.is_valid);

        // A corrupt push lands; the next audit restores from that backup
        let mut corrupt = engine.profile().unwrap();
        corrupt.balance = -5;
        corrupt.updated_at += 1_000;
        engine.apply_profile_push(corrupt);
        assert_eq!(engine.balance().unwrap(), -5);

        let report = svc.audit_once(&engine).await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(engine.balance().unwrap(), 40);
        assert!(!notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_prunes_but_keeps_newest() {
        let db = shared_db();
        let svc = IntegrityService::new(
            Arc::clone(&db),
            Arc::new(MockNotifier::new()),
            BackupConfig {
                retention_days: 0,
                ..BackupConfig::default()
            },
        );

        svc.create_backup(&healthy_profile(10), &[], BackupReason::Manual)
            .unwrap();
        svc.create_backup(&healthy_profile(20), &[], BackupReason::Manual)
            .unwrap();

        // Retention of zero days makes everything prunable except the newest
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        svc.cleanup_old_backups().unwrap();
        let db = db.lock();
        assert_eq!(BackupStore::new(&db).count().unwrap(), 1);
    }
}
