//! MemoryCacheStore - BackingStore implementation over a shared in-memory map

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use stratum_core::{BackingStore, Result, SessionRecord};

/// Configuration for the in-memory cache tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of cached sessions (None = unbounded)
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl MemoryCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of cached sessions
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bytes: Vec<u8>,
    expiration_time: i64,
}

/// Volatile cache tier
///
/// When `max_entries` is reached, the entry closest to expiration is evicted
/// to make room. Eviction only costs a cache miss: the durable tier still
/// holds the record.
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    config: MemoryCacheConfig,
}

impl MemoryCacheStore {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }

    /// Create a cache with custom configuration
    pub fn with_config(config: MemoryCacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Number of cached records
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every record expired at `now`, returning how many were removed
    pub async fn purge_expired(&self, now: i64) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expiration_time >= now);
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions from memory cache");
        }
        purged
    }

    fn evict_one(entries: &mut HashMap<String, CacheEntry>) {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expiration_time)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            tracing::trace!(key = %key, "Evicting session from full memory cache");
            entries.remove(&key);
        }
    }
}

#[async_trait]
impl BackingStore for MemoryCacheStore {
    fn name(&self) -> &str {
        "cache"
    }

    async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => Ok(Some(SessionRecord::from_bytes(&entry.bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: &SessionRecord) -> Result<()> {
        let entry = CacheEntry {
            bytes: record.to_bytes()?,
            expiration_time: record.expiration_time,
        };

        let mut entries = self.entries.write().await;
        if let Some(max) = self.config.max_entries
            && !entries.contains_key(key)
            && entries.len() >= max.max(1)
        {
            Self::evict_one(&mut entries);
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, SessionRecord>>> {
        let entries = self.entries.read().await;
        let mut records = HashMap::with_capacity(entries.len());
        for (key, entry) in entries.iter() {
            records.insert(key.clone(), SessionRecord::from_bytes(&entry.bytes)?);
        }
        Ok(Some(records))
    }
}
