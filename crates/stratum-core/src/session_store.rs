//! Backing store trait shared by every session tier
//!
//! The `BackingStore` trait is the uniform capability set a tier exposes to
//! the store chain. Implementations:
//! - `MemoryCacheStore`: fast, volatile cache tier
//! - `SqliteSessionStore`: durable tier (synchronous or deferred writes)

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{Result, SessionRecord};

/// Prefix that namespaces session keys in every tier
pub const SESSION_PREFIX: &str = "_ahs";

/// Build the store key for a session id
pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

/// Recover the session id from a store key, if the key is namespaced
pub fn session_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(SESSION_PREFIX)
}

/// Backing store trait
///
/// # Example
/// ```no_run
/// # use stratum_core::{BackingStore, SessionRecord, session_key};
/// # async fn example(store: &dyn BackingStore) -> stratum_core::Result<()> {
/// let key = session_key("abc");
/// store.put(&key, &SessionRecord::new(0, 60_000)).await?;
/// assert!(store.get(&key).await?.is_some());
/// store.delete(&key).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Short tier name used in logs and metrics
    fn name(&self) -> &str;

    /// Fetch a record by key
    ///
    /// A missing key is `Ok(None)`, never an error.
    ///
    /// # Errors
    /// - `Error::Transient` if the store reports a retryable condition
    /// - `Error::CorruptRecord` / `Error::Serialization` for undecodable data
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>>;

    /// Store a record, overwriting any previous value
    ///
    /// # Errors
    /// - `Error::Transient` if the write could not be performed right now
    async fn put(&self, key: &str, record: &SessionRecord) -> Result<()>;

    /// Remove a record. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all records keyed by store key
    ///
    /// Returns `Ok(None)` when the tier does not support enumeration.
    async fn get_all(&self) -> Result<Option<HashMap<String, SessionRecord>>> {
        Ok(None)
    }
}
