//! Pure balance arithmetic
//!
//! All profile mutation funnels through [`apply_to_profile`] so the
//! non-negative and conservation invariants hold at every committed state.

use crate::models::{Profile, TransactionKind, TransactionRecord};
use crate::{Error, Result};

/// Totals recomputed from a transaction history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    /// Sum of earn amounts
    pub earned: i64,
    /// Sum of spend amounts
    pub spent: i64,
    /// Sum of refund amounts
    pub refunded: i64,
}

impl LedgerTotals {
    /// Balance implied by these totals
    pub fn balance(&self) -> i64 {
        self.earned + self.refunded - self.spent
    }
}

/// Signed balance effect of a transaction
pub fn balance_delta(kind: TransactionKind, amount: i64) -> i64 {
    if kind.credits_balance() {
        amount
    } else {
        -amount
    }
}

/// Apply a transaction's effect to a profile.
///
/// Rejects non-positive amounts, spends exceeding the balance, and
/// arithmetic overflow. Earn increments `total_earned`; refund credits the
/// balance only; spend decrements the balance and increments `total_spent`.
/// The caller stamps `updated_at`.
pub fn apply_to_profile(profile: &mut Profile, kind: TransactionKind, amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "transaction amount must be positive, got {}",
            amount
        )));
    }

    match kind {
        TransactionKind::Earn => {
            profile.balance = checked_add(profile.balance, amount)?;
            profile.total_earned = checked_add(profile.total_earned, amount)?;
        }
        TransactionKind::Refund => {
            profile.balance = checked_add(profile.balance, amount)?;
        }
        TransactionKind::Spend => {
            if profile.balance < amount {
                return Err(Error::InsufficientBalance {
                    required: amount,
                    available: profile.balance,
                });
            }
            profile.balance -= amount;
            profile.total_spent = checked_add(profile.total_spent, amount)?;
        }
    }

    Ok(())
}

/// Recompute totals from a transaction history.
///
/// Used by corruption repair to rebuild `total_earned`/`total_spent` when
/// the ledger head disagrees with its own audit trail.
pub fn recompute_totals(transactions: &[TransactionRecord]) -> LedgerTotals {
    let mut totals = LedgerTotals::default();
    for tx in transactions {
        match tx.kind {
            TransactionKind::Earn => totals.earned += tx.amount,
            TransactionKind::Spend => totals.spent += tx.amount,
            TransactionKind::Refund => totals.refunded += tx.amount,
        }
    }
    totals
}

/// Sum of refund amounts in a history
pub fn refund_total(transactions: &[TransactionRecord]) -> i64 {
    transactions
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Refund)
        .map(|tx| tx.amount)
        .sum()
}

fn checked_add(a: i64, b: i64) -> Result<i64> {
    a.checked_add(b)
        .ok_or_else(|| Error::AmountOverflow(format!("{} + {}", a, b)))
}
