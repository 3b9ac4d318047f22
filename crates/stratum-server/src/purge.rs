//! Periodic removal of expired sessions from tiers that hold them

use std::sync::Arc;
use std::time::Duration;

use stratum_core::Clock;
use stratum_observability::Metrics;
use tokio::task::JoinHandle;

use crate::stores::Tiers;

/// Purge expired records from every tier once. Returns the number removed.
pub async fn purge_once(tiers: &Tiers, now: i64, metrics: Option<&Metrics>) -> u64 {
    let mut removed = 0;

    if let Some(durable) = &tiers.durable {
        match durable.purge_expired(now).await {
            Ok(count) => {
                if let Some(metrics) = metrics {
                    metrics.record_sessions_purged("durable", count);
                }
                removed += count;
            }
            Err(e) => tracing::warn!("Failed to purge durable session store: {}", e),
        }
    }

    if let Some(cache) = &tiers.cache {
        let count = cache.purge_expired(now).await as u64;
        if let Some(metrics) = metrics {
            metrics.record_sessions_purged("cache", count);
        }
        removed += count;
    }

    removed
}

/// Run [`purge_once`] every `interval` until the task is aborted
pub fn spawn_purge_task(
    tiers: Tiers,
    clock: Arc<dyn Clock>,
    interval: Duration,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = purge_once(&tiers, clock.now_millis(), Some(&metrics)).await;
            if removed > 0 {
                tracing::info!(removed, "Purged expired sessions");
            } else {
                tracing::debug!("No expired sessions to purge");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{BackingStore, ManualClock, SessionRecord};
    use stratum_store_memory::MemoryCacheStore;
    use stratum_store_sqlite::{SqliteSessionStore, SqliteStoreConfig};

    async fn tiers(dir: &tempfile::TempDir) -> Tiers {
        let durable = SqliteSessionStore::new(SqliteStoreConfig::new(dir.path().join("s.db")))
            .await
            .unwrap();
        Tiers {
            durable: Some(Arc::new(durable)),
            cache: Some(Arc::new(MemoryCacheStore::new())),
        }
    }

    #[tokio::test]
    async fn test_purge_once_removes_expired_from_both_tiers() {
        let dir = tempfile::TempDir::new().unwrap();
        let tiers = tiers(&dir).await;
        let durable = tiers.durable.clone().unwrap();
        let cache = tiers.cache.clone().unwrap();

        let stores: [Arc<dyn BackingStore>; 2] = [durable.clone(), cache.clone()];
        for store in stores {
            store.put("_ahsold", &SessionRecord::new(0, 1_000)).await.unwrap();
            store.put("_ahsnew", &SessionRecord::new(0, 100_000)).await.unwrap();
        }

        let metrics = Metrics::new().unwrap();
        let removed = purge_once(&tiers, 50_000, Some(&metrics)).await;

        assert_eq!(removed, 2);
        assert_eq!(durable.count().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(
            metrics
                .sessions_purged_total
                .with_label_values(&["durable"])
                .get(),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_runs_on_interval() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .put("_ahsold", &SessionRecord::new(0, 1_000))
            .await
            .unwrap();
        let tiers = Tiers {
            durable: None,
            cache: Some(cache.clone()),
        };

        let handle = spawn_purge_task(
            tiers,
            Arc::new(ManualClock::new(10_000)),
            Duration::from_secs(60),
            Arc::new(Metrics::new().unwrap()),
        );

        // Nothing happens before the first interval elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.len().await, 0);

        handle.abort();
    }
}
