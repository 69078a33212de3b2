//! Error types for Questa Core
//!
//! Error taxonomy shared by the ledger engine and its services.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Questa Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad caller input (empty description, non-positive amount, missing profile)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Spend rejected because the balance does not cover the amount
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Tokens required by the operation
        required: i64,
        /// Tokens currently available
        available: i64,
    },

    /// Both the online commit and the offline enqueue failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Queue drain failed for an entry; retried on the next connectivity edge
    #[error("Sync error: {0}")]
    Sync(String),

    /// Detected ledger corruption
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Remote ledger call failed
    #[error("Remote ledger error: {0}")]
    Remote(String),

    /// Remote ledger unreachable (offline)
    #[error("Remote ledger unreachable: {0}")]
    Unreachable(String),

    /// Balance arithmetic overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::InsufficientBalance { .. } | Error::Unreachable(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(_) => {
                "That request looks invalid. Please check the amount and description.".to_string()
            }
            Error::InsufficientBalance { required, available } => {
                format!(
                    "Not enough tokens: this needs {} but only {} are available. Complete a quest to earn more.",
                    required, available
                )
            }
            Error::Unreachable(_) => {
                "You're offline right now. The change was saved and will sync when you reconnect."
                    .to_string()
            }
            Error::Persistence(_) => {
                "The change could not be saved. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::InsufficientBalance { .. } | Error::AmountOverflow(_) => ErrorCategory::Balance,
            Error::Persistence(_) => ErrorCategory::Persistence,
            Error::Sync(_) => ErrorCategory::Sync,
            Error::Integrity(_) => ErrorCategory::Integrity,
            Error::Remote(_) | Error::Unreachable(_) => ErrorCategory::Remote,
            Error::Serialization(_) | Error::Io(_) | Error::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-input errors
    Validation,
    /// Balance and amount errors
    Balance,
    /// Local persistence errors
    Persistence,
    /// Queue sync errors
    Sync,
    /// Ledger integrity errors
    Integrity,
    /// Remote ledger errors
    Remote,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "Validation"),
            ErrorCategory::Balance => write!(f, "Balance"),
            ErrorCategory::Persistence => write!(f, "Persistence"),
            ErrorCategory::Sync => write!(f, "Sync"),
            ErrorCategory::Integrity => write!(f, "Integrity"),
            ErrorCategory::Remote => write!(f, "Remote"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
