//! Store chain wiring
//!
//! Builds the configured tiers and arranges them into a [`StoreChain`].

use std::sync::Arc;

use anyhow::Context;
use stratum_core::{BackingStore, Clock};
use stratum_observability::Metrics;
use stratum_session::StoreChain;
use stratum_store_memory::MemoryCacheStore;
use stratum_store_sqlite::SqliteSessionStore;

use crate::config::{CACHE_TIER, DURABLE_TIER, StoresConfig};

/// Concrete tiers kept for maintenance tasks and shutdown
#[derive(Clone, Default)]
pub struct Tiers {
    pub durable: Option<Arc<SqliteSessionStore>>,
    pub cache: Option<Arc<MemoryCacheStore>>,
}

impl Tiers {
    fn resolve(&self, name: &str) -> anyhow::Result<Arc<dyn BackingStore>> {
        let store: Option<Arc<dyn BackingStore>> = match name {
            DURABLE_TIER => self
                .durable
                .clone()
                .map(|s| s as Arc<dyn BackingStore>),
            CACHE_TIER => self.cache.clone().map(|s| s as Arc<dyn BackingStore>),
            _ => None,
        };
        store.with_context(|| format!("tier '{}' is not configured", name))
    }

    /// Flush pending writes and stop background workers
    pub async fn shutdown(&self) {
        if let Some(durable) = &self.durable
            && let Err(e) = durable.shutdown().await
        {
            tracing::error!("Failed to flush durable session store: {}", e);
        }
    }
}

/// Open the tiers named in the configuration
pub async fn open_tiers(config: &StoresConfig) -> anyhow::Result<Tiers> {
    let mut tiers = Tiers::default();

    if config.uses(DURABLE_TIER) {
        tracing::info!(
            path = %config.sqlite.path.display(),
            write_mode = ?config.sqlite.write_mode,
            "Opening durable session store"
        );
        let store = SqliteSessionStore::new(config.sqlite.clone())
            .await
            .context("failed to open SQLite session store")?;
        tiers.durable = Some(Arc::new(store));
    }

    if config.uses(CACHE_TIER) {
        tracing::info!(max_entries = ?config.cache.max_entries, "Creating session cache");
        tiers.cache = Some(Arc::new(MemoryCacheStore::with_config(
            config.cache.clone(),
        )));
    }

    Ok(tiers)
}

/// Arrange opened tiers into a chain following the configured orders
pub fn build_chain(
    config: &StoresConfig,
    tiers: &Tiers,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<StoreChain> {
    let write_order = config
        .write_order
        .iter()
        .map(|name| tiers.resolve(name))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let read_order = config
        .effective_read_order()
        .iter()
        .map(|name| tiers.resolve(name))
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        write_order = ?config.write_order,
        read_order = ?config.effective_read_order(),
        "Session store chain configured"
    );

    Ok(StoreChain::with_orders(write_order, read_order, clock)?.with_metrics(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{ManualClock, SessionRecord};

    #[tokio::test]
    async fn test_cache_only_chain() {
        let config = StoresConfig {
            write_order: vec![CACHE_TIER.to_string()],
            ..Default::default()
        };

        let tiers = open_tiers(&config).await.unwrap();
        assert!(tiers.durable.is_none());
        assert!(tiers.cache.is_some());

        let chain = build_chain(
            &config,
            &tiers,
            Arc::new(ManualClock::new(0)),
            Arc::new(Metrics::new().unwrap()),
        )
        .unwrap();
        assert_eq!(chain.write_order().len(), 1);
        assert_eq!(chain.write_order()[0].name(), "cache");
    }

    #[tokio::test]
    async fn test_durable_and_cache_chain() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = StoresConfig::default();
        config.sqlite.path = dir.path().join("sessions.db");

        let tiers = open_tiers(&config).await.unwrap();
        let chain = build_chain(
            &config,
            &tiers,
            Arc::new(ManualClock::new(0)),
            Arc::new(Metrics::new().unwrap()),
        )
        .unwrap();

        assert_eq!(chain.write_order()[0].name(), "durable");
        assert_eq!(chain.read_order()[0].name(), "cache");

        chain
            .save("abc", &SessionRecord::new(0, 60_000))
            .await
            .unwrap();
        assert_eq!(tiers.durable.as_ref().unwrap().count().await.unwrap(), 1);
        assert_eq!(tiers.cache.as_ref().unwrap().len().await, 1);

        tiers.shutdown().await;
    }

    #[test]
    fn test_missing_tier_is_rejected() {
        let config = StoresConfig::default();
        let tiers = Tiers::default();
        assert!(
            build_chain(
                &config,
                &tiers,
                Arc::new(ManualClock::new(0)),
                Arc::new(Metrics::new().unwrap()),
            )
            .is_err()
        );
    }
}
