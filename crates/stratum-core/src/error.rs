//! Error types for Stratum Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The tier is reachable but reported a retryable condition
    #[error("Transient error in {store} store: {message}")]
    Transient { store: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt session record: {0}")]
    CorruptRecord(String),

    #[error("Cannot generate session id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a transient error attributed to the named store
    pub fn transient(store: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transient {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    /// Whether the error must abort the current operation without retry
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = Error::transient("cache", "connection refused");
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Transient error in cache store: connection refused"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let exhausted = Error::IdSpaceExhausted { attempts: 100 };
        assert!(exhausted.is_fatal());
        assert!(exhausted.to_string().contains("100 attempts"));

        let corrupt = Error::CorruptRecord("bad json".to_string());
        assert!(corrupt.is_fatal());

        let serde_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(Error::from(serde_err).is_fatal());
    }
}
