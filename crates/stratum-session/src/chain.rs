//! Ordered composition of backing stores
//!
//! Writes go through every tier in write order and stop at the first
//! failure, so a tier is never written unless all tiers before it
//! accepted the record. Reads walk the tiers in read order and return
//! the first record found; a transient failure in one tier falls back
//! to the next.

use std::collections::HashMap;
use std::sync::Arc;

use stratum_core::{
    BackingStore, Clock, Error, Result, SessionRecord, session_id_from_key, session_key,
};
use stratum_observability::Metrics;

pub struct StoreChain {
    write_order: Vec<Arc<dyn BackingStore>>,
    read_order: Vec<Arc<dyn BackingStore>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl StoreChain {
    /// Build a chain whose read order is the reverse of `write_order`
    pub fn new(write_order: Vec<Arc<dyn BackingStore>>, clock: Arc<dyn Clock>) -> Self {
        let read_order = write_order.iter().rev().cloned().collect();
        Self {
            write_order,
            read_order,
            clock,
            metrics: None,
        }
    }

    /// Build a chain with an explicit read order.
    ///
    /// Both orders must name the same stores, each exactly once.
    pub fn with_orders(
        write_order: Vec<Arc<dyn BackingStore>>,
        read_order: Vec<Arc<dyn BackingStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if write_order.len() != read_order.len() {
            return Err(Error::Config(format!(
                "read order has {} stores but write order has {}",
                read_order.len(),
                write_order.len()
            )));
        }

        for (i, store) in write_order.iter().enumerate() {
            if write_order[..i].iter().any(|other| same_store(other, store)) {
                return Err(Error::Config(format!(
                    "store '{}' appears twice in write order",
                    store.name()
                )));
            }
            if !read_order.iter().any(|other| same_store(other, store)) {
                return Err(Error::Config(format!(
                    "store '{}' is missing from read order",
                    store.name()
                )));
            }
        }

        Ok(Self {
            write_order,
            read_order,
            clock,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn write_order(&self) -> &[Arc<dyn BackingStore>] {
        &self.write_order
    }

    pub fn read_order(&self) -> &[Arc<dyn BackingStore>] {
        &self.read_order
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Write the record to every tier in write order
    pub async fn save(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        let key = session_key(session_id);

        for store in &self.write_order {
            let result = store.put(&key, record).await;
            self.record_operation(store.name(), "put", &result);

            if let Err(e) = result {
                tracing::warn!(
                    store = store.name(),
                    session_id = %session_id,
                    "Session write failed, skipping remaining tiers: {}",
                    e
                );
                return Err(e);
            }
        }

        Ok(())
    }

    /// Load the first record found in read order, hiding it if expired.
    ///
    /// A tier that fails is logged and treated as a miss, so a read never
    /// aborts on a single broken tier.
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let key = session_key(session_id);
        let mut found = None;

        for store in &self.read_order {
            let result = store.get(&key).await;
            self.record_operation(store.name(), "get", &result);

            match result {
                Ok(Some(record)) => {
                    tracing::debug!(store = store.name(), session_id = %session_id, "Session found");
                    found = Some(record);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        store = store.name(),
                        session_id = %session_id,
                        fatal = e.is_fatal(),
                        "Session read failed, falling back to next tier: {}",
                        e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_read_fallback(store.name());
                    }
                }
            }
        }

        let Some(record) = found else {
            return Ok(None);
        };

        // The first record found is authoritative even when a later tier
        // might hold a fresher copy
        let now = self.clock.now_millis();
        if record.is_expired(now) {
            tracing::debug!(
                session_id = %session_id,
                expired_for_ms = record.expired_for(now),
                "Session has expired"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_session_expired();
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Delete the record from every tier.
    ///
    /// All tiers are attempted; the first failure is returned.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let key = session_key(session_id);
        let mut first_error = None;

        for store in &self.write_order {
            let result = store.delete(&key).await;
            self.record_operation(store.name(), "delete", &result);

            if let Err(e) = result {
                tracing::warn!(
                    store = store.name(),
                    session_id = %session_id,
                    "Session delete failed: {}",
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Enumerate live sessions from the first tier that supports it.
    ///
    /// Returns an empty map when no tier can enumerate.
    pub async fn get_all(&self) -> Result<HashMap<String, SessionRecord>> {
        let now = self.clock.now_millis();

        for store in &self.read_order {
            let result = store.get_all().await;
            self.record_operation(store.name(), "get_all", &result);

            match result {
                Ok(Some(entries)) => {
                    return Ok(entries
                        .into_iter()
                        .filter(|(_, record)| !record.is_expired(now))
                        .filter_map(|(key, record)| {
                            session_id_from_key(&key).map(|id| (id.to_string(), record))
                        })
                        .collect());
                }
                Ok(None) => {
                    tracing::debug!(store = store.name(), "Store cannot enumerate sessions");
                }
                Err(e) => {
                    tracing::warn!(
                        store = store.name(),
                        fatal = e.is_fatal(),
                        "Session enumeration failed, trying next tier: {}",
                        e
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_read_fallback(store.name());
                    }
                }
            }
        }

        Ok(HashMap::new())
    }

    fn record_operation<T>(&self, store: &str, op: &str, result: &Result<T>) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => "ok",
                Err(e) if e.is_transient() => "transient",
                Err(_) => "fatal",
            };
            metrics.record_store_operation(store, op, outcome);
        }
    }
}

fn same_store(a: &Arc<dyn BackingStore>, b: &Arc<dyn BackingStore>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::ManualClock;
    use stratum_store_memory::MemoryCacheStore;

    fn stores() -> (Arc<dyn BackingStore>, Arc<dyn BackingStore>) {
        (
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MemoryCacheStore::new()),
        )
    }

    #[test]
    fn test_default_read_order_is_reversed() {
        let (durable, cache) = stores();
        let chain = StoreChain::new(
            vec![durable.clone(), cache.clone()],
            Arc::new(ManualClock::new(0)),
        );

        assert!(same_store(&chain.write_order()[0], &durable));
        assert!(same_store(&chain.read_order()[0], &cache));
        assert!(same_store(&chain.read_order()[1], &durable));
    }

    #[test]
    fn test_with_orders_validation() {
        let (a, b) = stores();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));

        assert!(
            StoreChain::with_orders(vec![a.clone(), b.clone()], vec![a.clone(), b.clone()], clock.clone())
                .is_ok()
        );
        assert!(StoreChain::with_orders(vec![a.clone(), b.clone()], vec![a.clone()], clock.clone()).is_err());
        assert!(
            StoreChain::with_orders(vec![a.clone(), a.clone()], vec![a.clone(), b.clone()], clock.clone())
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_load_hides_expired_record() {
        let (durable, cache) = stores();
        let clock = Arc::new(ManualClock::new(1_000));
        let chain = StoreChain::new(vec![durable, cache], clock.clone());

        chain.save("s1", &SessionRecord::new(1_000, 500)).await.unwrap();
        assert!(chain.load("s1").await.unwrap().is_some());

        // Expiration is exclusive: still live at the exact deadline
        clock.set(1_500);
        assert!(chain.load("s1").await.unwrap().is_some());

        clock.set(1_501);
        assert!(chain.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_all_strips_prefix_and_filters_expired() {
        let (durable, cache) = stores();
        let clock = Arc::new(ManualClock::new(0));
        let chain = StoreChain::new(vec![durable.clone(), cache], clock.clone());

        chain.save("live", &SessionRecord::new(0, 10_000)).await.unwrap();
        chain.save("dead", &SessionRecord::new(0, 100)).await.unwrap();
        durable
            .put("not-a-session", &SessionRecord::new(0, 10_000))
            .await
            .unwrap();

        clock.set(5_000);
        let all = chain.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("live"));
    }
}
