//! Service configuration

/// Wallet engine configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Transactions at or above this amount trigger an opportunistic backup
    pub backup_threshold: i64,
    /// How many recent transactions to keep cached and include in backups
    pub recent_tx_limit: u32,
    /// Queue drain retry interval while online and non-empty (seconds)
    pub drain_retry_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            backup_threshold: 50, // a large transaction for a ward's ledger
            recent_tx_limit: 50,
            drain_retry_secs: 30,
        }
    }
}

/// Metered billing configuration
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Spend rate while an entertainment app is open
    pub tokens_per_minute: u32,
    /// Billing tick cadence (milliseconds)
    pub tick_interval_ms: u64,
}

impl MeterConfig {
    /// Milliseconds of usage one token buys
    pub fn ms_per_token(&self) -> i64 {
        60_000 / i64::from(self.tokens_per_minute.max(1))
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            tokens_per_minute: 5, // 12 seconds of screen time per token
            tick_interval_ms: 1_000,
        }
    }
}

/// Backup and integrity configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Minimum gap between scheduled backups (hours)
    pub interval_hours: u32,
    /// Snapshots older than this are pruned (days)
    pub retention_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            retention_days: 30,
        }
    }
}

/// Quest approval configuration
#[derive(Debug, Clone)]
pub struct QuestConfig {
    /// Minimum verification confidence (0-100) to approve a quest
    pub min_confidence: u8,
}

impl Default for QuestConfig {
    fn default() -> Self {
        Self { min_confidence: 70 }
    }
}
