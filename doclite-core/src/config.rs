// src/config.rs
// Engine and pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DocLiteError, Result};

/// Upper bound for every timeout setting (one day)
pub const MAX_TIMEOUT_MS: u64 = 86_400_000;

/// SQLite journaling mode applied to every pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers proceed concurrently with the single writer
    #[default]
    Wal,
    Delete,
    Truncate,
    Memory,
}

impl JournalMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// SQLite file locking mode.
///
/// `Exclusive` keeps the file lock after the first write on a connection, so any other
/// pooled connection blocks until that connection closes. It only makes sense with a
/// pool of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockingMode {
    #[default]
    Normal,
    Exclusive,
}

impl LockingMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            LockingMode::Normal => "NORMAL",
            LockingMode::Exclusive => "EXCLUSIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynchronousMode {
    Off,
    #[default]
    Normal,
    Full,
}

impl SynchronousMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            SynchronousMode::Off => "OFF",
            SynchronousMode::Normal => "NORMAL",
            SynchronousMode::Full => "FULL",
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of open engine connections
    pub pool_size: usize,
    /// How long `acquire()` and the write gate wait before failing with `Busy`
    pub acquire_timeout_ms: u64,
    /// Engine-internal lock wait (SQLite busy handler)
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
    pub locking_mode: LockingMode,
    pub synchronous: SynchronousMode,
    /// Page cache size in KiB
    pub cache_size_kib: i64,
    /// Result cap applied when a query has no explicit limit
    pub max_results: usize,
    /// Rows deserialized per batch when materializing results
    pub fetch_batch_size: usize,
    /// Documents written per batch inside a bulk transaction
    pub write_batch_size: usize,
    /// Run a no-op `SELECT 1` before handing out a reused connection
    pub health_check_on_acquire: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            acquire_timeout_ms: 5000,
            busy_timeout_ms: 5000,
            journal_mode: JournalMode::Wal,
            locking_mode: LockingMode::Normal,
            synchronous: SynchronousMode::Normal,
            cache_size_kib: 16000,
            max_results: 10_000,
            fetch_batch_size: 500,
            write_batch_size: 1000,
            health_check_on_acquire: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a (possibly partial) JSON configuration; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn with_locking_mode(mut self, mode: LockingMode) -> Self {
        self.locking_mode = mode;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size;
        self
    }

    pub fn with_write_batch_size(mut self, size: usize) -> Self {
        self.write_batch_size = size;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("pool_size", self.pool_size),
            ("max_results", self.max_results),
            ("fetch_batch_size", self.fetch_batch_size),
            ("write_batch_size", self.write_batch_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(DocLiteError::Validation(format!("{} must be greater than zero", name)));
            }
        }
        let timeouts = [
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("busy_timeout_ms", self.busy_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value > MAX_TIMEOUT_MS {
                return Err(DocLiteError::Validation(format!(
                    "{} must be at most {} ({} given)",
                    name, MAX_TIMEOUT_MS, value
                )));
            }
        }
        Ok(())
    }
}
