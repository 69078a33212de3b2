//! Ledger data model

use serde::{Deserialize, Serialize};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Guardian account (manages wards, receives corruption notifications)
    Guardian,
    /// Ward account (earns and spends tokens)
    Ward,
}

/// Profile record (ledger head)
///
/// Mutated only by committing a transaction. Committed states satisfy
/// `balance >= 0` and `balance + total_spent <= total_earned + refunds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Profile ID (server-assigned)
    pub id: String,
    /// Display name
    pub display_name: String,
    /// Account role
    pub role: Role,
    /// Current token balance
    pub balance: i64,
    /// Lifetime tokens earned (refunds excluded)
    pub total_earned: i64,
    /// Lifetime tokens spent
    pub total_spent: i64,
    /// Last update timestamp (unix millis)
    pub updated_at: i64,
}

impl Profile {
    /// Create a fresh profile with a zero ledger
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            balance: 0,
            total_earned: 0,
            total_spent: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// How far the ledger head sits from strict conservation.
    ///
    /// Zero for earn/spend-only histories; positive by exactly the sum of
    /// refunds; any other positive value indicates a fabricated balance.
    pub fn conservation_gap(&self) -> i64 {
        self.balance + self.total_spent - self.total_earned
    }
}

/// Transaction kind
///
/// Refund is a first-class variant: it credits the balance but is excluded
/// from `total_earned`, so failure compensation never inflates the earned
/// statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Quest reward
    Earn,
    /// Metered usage charge
    Spend,
    /// Balance-only credit compensating a failed spend
    Refund,
}

impl TransactionKind {
    /// Whether this kind credits the balance
    pub fn credits_balance(&self) -> bool {
        !matches!(self, TransactionKind::Spend)
    }

    /// Whether this kind counts toward `total_earned`
    pub fn counts_toward_earned(&self) -> bool {
        matches!(self, TransactionKind::Earn)
    }

    /// Stable string form used in storage rows
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earn => "earn",
            TransactionKind::Spend => "spend",
            TransactionKind::Refund => "refund",
        }
    }

    /// Parse the storage string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "earn" => Some(TransactionKind::Earn),
            "spend" => Some(TransactionKind::Spend),
            "refund" => Some(TransactionKind::Refund),
            _ => None,
        }
    }
}

/// Transaction record (ledger entry)
///
/// Immutable once committed: never updated or deleted (append-only audit
/// trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Server-assigned ID (None until the remote store has seen it)
    pub id: Option<String>,
    /// Owning profile ID
    pub profile_id: String,
    /// Transaction kind
    pub kind: TransactionKind,
    /// Token amount (always positive; the kind carries the sign)
    pub amount: i64,
    /// Human-readable description
    pub description: String,
    /// Optional proof reference (quest photo pointer)
    pub proof_ref: Option<String>,
    /// Optional entertainment-app tag for usage charges
    pub app_tag: Option<String>,
    /// Creation timestamp (unix millis)
    pub created_at: i64,
}

impl TransactionRecord {
    /// Build an uncommitted record stamped with the current time
    pub fn new(
        profile_id: impl Into<String>,
        kind: TransactionKind,
        amount: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            profile_id: profile_id.into(),
            kind,
            amount,
            description: description.into(),
            proof_ref: None,
            app_tag: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach a quest photo proof reference
    pub fn with_proof(mut self, proof_ref: impl Into<String>) -> Self {
        self.proof_ref = Some(proof_ref.into());
        self
    }

    /// Attach an entertainment-app tag
    pub fn with_app_tag(mut self, app_tag: impl Into<String>) -> Self {
        self.app_tag = Some(app_tag.into());
        self
    }
}

/// A transaction waiting in the offline queue
///
/// Carries a locally generated ID distinct from any server-assigned one,
/// since the server has not yet seen the entry. Removed once the remote
/// commit is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTransaction {
    /// Locally generated ID (uuid v4)
    pub local_id: String,
    /// The transaction payload
    pub transaction: TransactionRecord,
    /// Whether the remote commit has been confirmed
    pub synced: bool,
    /// Enqueue timestamp (unix millis)
    pub queued_at: i64,
}

/// Why a backup snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    /// Rolling schedule (at least daily)
    Scheduled,
    /// A mutation at or above the large-transaction threshold
    LargeTransaction,
    /// Taken immediately before attempting corruption recovery
    PreRecovery,
    /// Explicit request
    Manual,
}

impl BackupReason {
    /// Stable string form used in storage rows
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupReason::Scheduled => "scheduled",
            BackupReason::LargeTransaction => "large_transaction",
            BackupReason::PreRecovery => "pre_recovery",
            BackupReason::Manual => "manual",
        }
    }

    /// Parse the storage string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(BackupReason::Scheduled),
            "large_transaction" => Some(BackupReason::LargeTransaction),
            "pre_recovery" => Some(BackupReason::PreRecovery),
            "manual" => Some(BackupReason::Manual),
            _ => None,
        }
    }
}

/// Timestamped copy of {profile, last-N transactions}
///
/// Used only for read-only restoration, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Profile at snapshot time
    pub profile: Profile,
    /// Most recent transactions at snapshot time
    pub transactions: Vec<TransactionRecord>,
    /// Why the snapshot was taken
    pub reason: BackupReason,
    /// Snapshot timestamp (unix millis)
    pub created_at: i64,
}

/// Metered billing session for one entertainment app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSession {
    /// Entertainment app name
    pub app_name: String,
    /// Session start (unix millis, wall clock; used for replay after a
    /// process restart)
    pub started_at: i64,
    /// Tokens already charged for this session
    pub tokens_charged: i64,
    /// Whether the session is still running
    pub active: bool,
}

/// Confidence marker on the locally cached profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceConfidence {
    /// Mirrors a committed remote state
    Confirmed,
    /// Ahead of the remote store by queued offline operations
    Optimistic,
}
