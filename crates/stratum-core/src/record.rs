//! The persisted unit of session state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Error, Result};

/// Session state as stored in every tier
///
/// All timestamps are milliseconds since the Unix epoch. A record is expired
/// once the current time is strictly greater than `expiration_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Attribute values keyed by name
    #[serde(default)]
    pub attributes: HashMap<String, Value>,

    /// When the session was created
    pub creation_time: i64,

    /// When the session was last saved by a request
    pub last_access_time: i64,

    /// Absolute expiration timestamp
    pub expiration_time: i64,
}

impl SessionRecord {
    /// Create an empty record that expires `timeout_millis` after `now`
    pub fn new(now: i64, timeout_millis: i64) -> Self {
        Self {
            attributes: HashMap::new(),
            creation_time: now,
            last_access_time: now,
            expiration_time: now.saturating_add(timeout_millis),
        }
    }

    /// Set an attribute value
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Check whether the record is expired at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiration_time
    }

    /// Milliseconds elapsed since expiration (zero if still live)
    pub fn expired_for(&self, now: i64) -> i64 {
        (now - self.expiration_time).max(0)
    }

    /// Encode the record for tiers that store opaque bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a record previously written with [`SessionRecord::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptRecord(format!("Failed to decode session record: {}", e)))
    }
}
