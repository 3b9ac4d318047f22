//! Configuration for the SQLite session tier

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How `put` reaches the database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// The row is written before `put` returns
    #[default]
    Sync,
    /// `put` enqueues the write and returns; a background worker persists it
    Deferred,
}

/// Configuration for [`crate::SqliteSessionStore`]
///
/// # Example
/// ```
/// use stratum_store_sqlite::{SqliteStoreConfig, WriteMode};
///
/// let config = SqliteStoreConfig::new("sessions.db")
///     .with_write_mode(WriteMode::Deferred)
///     .with_batch_size(50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file
    pub path: PathBuf,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a connection waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Synchronous or deferred writes
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Deferred mode: capacity of the write queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deferred mode: maximum writes per transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Deferred mode: maximum time a write waits in the queue (milliseconds)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Create a configuration for the given database path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            write_mode: WriteMode::default(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.batch_timeout_ms = timeout_ms;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.write_mode == WriteMode::Deferred {
            if self.queue_capacity == 0 {
                return Err("queue_capacity must be at least 1".to_string());
            }
            if self.batch_size == 0 {
                return Err("batch_size must be at least 1".to_string());
            }
            if self.batch_timeout_ms == 0 {
                return Err("batch_timeout_ms must be at least 1".to_string());
            }
        }
        Ok(())
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_timeout_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqliteStoreConfig::new("sessions.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.write_mode, WriteMode::Sync);
        assert_eq!(config.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deferred_validation() {
        let config = SqliteStoreConfig::new("sessions.db")
            .with_write_mode(WriteMode::Deferred)
            .with_batch_size(0);
        assert!(config.validate().is_err());

        // Batch settings are irrelevant in sync mode
        let config = SqliteStoreConfig::new("sessions.db").with_batch_size(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SqliteStoreConfig =
            serde_json::from_str(r#"{"path": "/tmp/s.db", "write_mode": "deferred"}"#).unwrap();
        assert_eq!(config.write_mode, WriteMode::Deferred);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }
}
