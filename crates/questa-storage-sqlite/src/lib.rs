//! On-device SQLite storage for the Questa wallet
//!
//! Provides the durable state that lets the ledger survive process death
//! while offline: the pending-transaction queue, the rolling backup
//! snapshot store, and the active billing-session record. WAL mode,
//! versioned migrations, and SQLITE_BUSY retry with backoff.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backups;
pub mod database;
pub mod error;
pub mod migrations;
pub mod queue;
pub mod session;

pub use backups::BackupStore;
pub use database::Database;
pub use error::{Error, Result};
pub use queue::{QueueStorage, BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_BUSY_RETRIES};
pub use session::SessionStore;
