//! Ledger integrity validators
//!
//! Pure structural and arithmetic checks over profile + transaction
//! snapshots. Recovery orchestration (backups, restore, notification)
//! lives in the wallet service.

use serde::{Deserialize, Serialize};

use crate::ledger::refund_total;
use crate::models::{Profile, TransactionRecord};

/// How structural a violation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic (empty description, stale timestamp)
    Low,
    /// Arithmetic mismatch, correctable from the audit trail
    Medium,
    /// Missing identity, not correctable in place
    High,
}

/// A single detected violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field the violation was detected on
    pub field: String,
    /// Human-readable description
    pub message: String,
    /// Violation severity
    pub severity: Severity,
    /// Whether local correction (clamping, recomputing) can fix it
    pub recoverable: bool,
}

impl ValidationIssue {
    fn new(field: &str, message: impl Into<String>, severity: Severity, recoverable: bool) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            severity,
            recoverable,
        }
    }
}

/// Validate a profile (ledger head) in isolation.
///
/// The conservation bound used here is the narrow one
/// (`balance + total_spent <= total_earned`); callers holding the
/// transaction history should use [`check_snapshot`], which widens the
/// bound by the refund total.
pub fn validate_profile(profile: &Profile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if profile.id.is_empty() {
        issues.push(ValidationIssue::new(
            "id",
            "profile is missing its identity",
            Severity::High,
            false,
        ));
    }

    if profile.balance < 0 {
        issues.push(ValidationIssue::new(
            "balance",
            format!("balance is negative ({})", profile.balance),
            Severity::Medium,
            true,
        ));
    }

    if profile.total_earned < 0 {
        issues.push(ValidationIssue::new(
            "total_earned",
            format!("total_earned is negative ({})", profile.total_earned),
            Severity::Medium,
            true,
        ));
    }

    if profile.total_spent < 0 {
        issues.push(ValidationIssue::new(
            "total_spent",
            format!("total_spent is negative ({})", profile.total_spent),
            Severity::Medium,
            true,
        ));
    }

    if profile.balance >= 0
        && profile.total_earned >= 0
        && profile.total_spent >= 0
        && profile.conservation_gap() > 0
    {
        issues.push(ValidationIssue::new(
            "balance",
            format!(
                "balance + total_spent exceeds total_earned by {}",
                profile.conservation_gap()
            ),
            Severity::Medium,
            true,
        ));
    }

    issues
}

/// Validate a single transaction record
pub fn validate_transaction(tx: &TransactionRecord) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if tx.profile_id.is_empty() {
        issues.push(ValidationIssue::new(
            "profile_id",
            "transaction is missing its owning profile",
            Severity::High,
            false,
        ));
    }

    if tx.amount <= 0 {
        issues.push(ValidationIssue::new(
            "amount",
            format!("amount must be positive, got {}", tx.amount),
            Severity::Medium,
            true,
        ));
    }

    if tx.description.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "description",
            "description is empty",
            Severity::Low,
            true,
        ));
    }

    issues
}

/// Aggregated result of a full-snapshot integrity check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// No errors were found (warnings do not fail the check)
    pub is_valid: bool,
    /// Medium/High severity violations
    pub errors: Vec<ValidationIssue>,
    /// Low severity violations and refund-tolerated conservation gaps
    pub warnings: Vec<ValidationIssue>,
    /// All errors are locally correctable, or a backup can stand in
    pub can_recover: bool,
    /// A backup snapshot exists to restore from
    pub backup_available: bool,
}

impl IntegrityReport {
    /// Whether any error is both High severity and unrecoverable in place
    pub fn has_unrecoverable(&self) -> bool {
        self.errors
            .iter()
            .any(|issue| issue.severity == Severity::High && !issue.recoverable)
    }

    /// One-line summary suitable for a guardian notification
    pub fn summary(&self) -> String {
        if self.is_valid {
            "ledger verified: no issues found".to_string()
        } else {
            format!(
                "ledger check found {} error(s), {} warning(s): {}",
                self.errors.len(),
                self.warnings.len(),
                self.errors
                    .iter()
                    .map(|issue| issue.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            )
        }
    }
}

/// Run both validators over a full snapshot and aggregate.
///
/// A conservation gap no larger than the snapshot's refund total is
/// downgraded to a warning: refunds credit the balance without touching
/// `total_earned`, so such a gap is expected, not corrupt.
pub fn check_snapshot(
    profile: &Profile,
    transactions: &[TransactionRecord],
    backup_available: bool,
) -> IntegrityReport {
    let refunds = refund_total(transactions);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for issue in validate_profile(profile) {
        let tolerated_gap = issue.field == "balance"
            && issue.severity == Severity::Medium
            && profile.balance >= 0
            && profile.conservation_gap() > 0
            && profile.conservation_gap() <= refunds;
        if tolerated_gap || issue.severity == Severity::Low {
            warnings.push(issue);
        } else {
            errors.push(issue);
        }
    }

    for tx in transactions {
        for issue in validate_transaction(tx) {
            if issue.severity == Severity::Low {
                warnings.push(issue);
            } else {
                errors.push(issue);
            }
        }
    }

    let is_valid = errors.is_empty();
    let can_recover = errors.iter().all(|issue| issue.recoverable) || backup_available;

    IntegrityReport {
        is_valid,
        errors,
        warnings,
        can_recover,
        backup_available,
    }
}
