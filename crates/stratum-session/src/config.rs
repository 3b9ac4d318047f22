//! Configuration for the session manager

use serde::{Deserialize, Serialize};

/// Default session timeout in minutes
pub const DEFAULT_TIMEOUT_MINUTES: i64 = 30;

/// Default number of candidate ids tried before giving up
pub const DEFAULT_MAX_ID_ATTEMPTS: u32 = 100;

/// Default number of random bytes per session id
pub const DEFAULT_ID_LENGTH_BYTES: usize = 30;

/// Configuration for [`crate::SessionManager`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Session timeout in minutes. Zero or negative means unbounded.
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: i64,

    /// Candidate ids generated before session creation fails
    #[serde(default = "default_max_id_attempts")]
    pub max_id_attempts: u32,

    /// Random bytes per generated session id
    #[serde(default = "default_id_length_bytes")]
    pub id_length_bytes: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            id_length_bytes: DEFAULT_ID_LENGTH_BYTES,
        }
    }
}

impl SessionManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session timeout in minutes
    pub fn with_timeout_minutes(mut self, minutes: i64) -> Self {
        self.default_timeout_minutes = minutes;
        self
    }

    /// Set the id generation retry bound
    pub fn with_max_id_attempts(mut self, attempts: u32) -> Self {
        self.max_id_attempts = attempts;
        self
    }

    /// Set the number of random bytes per session id
    pub fn with_id_length_bytes(mut self, bytes: usize) -> Self {
        self.id_length_bytes = bytes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_id_attempts == 0 {
            return Err("max_id_attempts must be at least 1".to_string());
        }
        if self.id_length_bytes < 16 {
            return Err("id_length_bytes must be at least 16".to_string());
        }
        Ok(())
    }
}

fn default_timeout_minutes() -> i64 {
    DEFAULT_TIMEOUT_MINUTES
}

fn default_max_id_attempts() -> u32 {
    DEFAULT_MAX_ID_ATTEMPTS
}

fn default_id_length_bytes() -> usize {
    DEFAULT_ID_LENGTH_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionManagerConfig::default();
        assert_eq!(config.default_timeout_minutes, 30);
        assert_eq!(config.max_id_attempts, 100);
        assert_eq!(config.id_length_bytes, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SessionManagerConfig::new()
            .with_timeout_minutes(-1)
            .with_max_id_attempts(5);

        assert_eq!(config.default_timeout_minutes, -1);
        assert_eq!(config.max_id_attempts, 5);
        assert_eq!(config.id_length_bytes, 30);
    }

    #[test]
    fn test_validation() {
        assert!(SessionManagerConfig::new().with_max_id_attempts(0).validate().is_err());
        assert!(SessionManagerConfig::new().with_id_length_bytes(8).validate().is_err());
    }
}
