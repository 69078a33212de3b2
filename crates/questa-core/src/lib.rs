//! Core ledger domain for the Questa attention-token wallet
//!
//! Defines the token ledger data model, pure balance arithmetic with
//! conservation invariants, integrity validators, and the collaborator
//! interfaces (remote ledger, quest verification, guardian notification)
//! consumed by the wallet service.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod integrity;
pub mod ledger;
pub mod models;
pub mod remote;

pub use error::{Error, ErrorCategory, Result};
pub use integrity::{
    check_snapshot, validate_profile, validate_transaction, IntegrityReport, Severity,
    ValidationIssue,
};
pub use ledger::{apply_to_profile, balance_delta, recompute_totals, refund_total, LedgerTotals};
pub use models::{
    BackupReason, BackupSnapshot, BalanceConfidence, Profile, QueuedTransaction, Role,
    TransactionKind, TransactionRecord, UsageSession,
};
pub use remote::{
    GuardianNotifier, MockNotifier, MockRemoteLedger, MockVerifier, ProfileChanges, QuestVerifier,
    RemoteLedger, Verification,
};
