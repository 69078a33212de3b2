//! Wallet orchestration for the Questa attention-token ledger
//!
//! Ties the core ledger model, the on-device queue/backup storage, and
//! the remote ledger collaborator together: optimistic earn/spend/refund
//! with offline queuing, connectivity-driven queue drains, periodic
//! integrity checks with backup recovery, and the metered billing timer
//! that converts app usage time into token charges.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod integrity_service;
pub mod meter;
pub mod quests;
pub mod sync;

pub use cancel::CancelToken;
pub use config::{BackupConfig, MeterConfig, QuestConfig, WalletConfig};
pub use connectivity::ConnectivityMonitor;
pub use engine::{SharedDb, WalletEngine, WalletStatus};
pub use integrity_service::{IntegrityService, RecoveryOutcome};
pub use meter::{MeterState, UsageMeter};
pub use quests::{QuestDecision, QuestReview};
pub use sync::{DrainOutcome, SyncDrainer};

/// Map a storage-layer failure into the core persistence error
pub(crate) fn storage_err(e: questa_storage_sqlite::Error) -> questa_core::Error {
    questa_core::Error::Persistence(e.to_string())
}
