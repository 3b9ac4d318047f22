//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Stratum:
//! - Backing store operation counts (by store, operation and outcome)
//! - Read fallbacks between tiers
//! - Session lifecycle counts (created, expired, invalidated, purged)
//! - Id collisions and liveness probe outcomes

use prometheus::{Counter, CounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for Stratum
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    // Store metrics
    /// Backing store operations
    pub store_operations_total: CounterVec,
    /// Reads that fell back to the next tier after a transient failure
    pub chain_read_fallbacks_total: CounterVec,

    // Session lifecycle
    pub sessions_created_total: Counter,
    /// Loads that found a record past its expiration time
    pub sessions_expired_total: Counter,
    pub sessions_invalidated_total: Counter,
    /// Expired records removed by the background purge
    pub sessions_purged_total: CounterVec,
    /// Generated ids that already belonged to a live session
    pub id_collisions_total: Counter,

    // Health
    /// Liveness probe requests (kind = local/remote)
    pub health_checks_total: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let store_operations_total = CounterVec::new(
            Opts::new(
                "stratum_store_operations_total",
                "Total number of backing store operations",
            ),
            &["store", "op", "outcome"],
        )?;

        let chain_read_fallbacks_total = CounterVec::new(
            Opts::new(
                "stratum_chain_read_fallbacks_total",
                "Reads that skipped a tier after a transient failure",
            ),
            &["store"],
        )?;

        let sessions_created_total = Counter::with_opts(Opts::new(
            "stratum_sessions_created_total",
            "Total number of sessions created",
        ))?;

        let sessions_expired_total = Counter::with_opts(Opts::new(
            "stratum_sessions_expired_total",
            "Total number of loads that found an expired session",
        ))?;

        let sessions_invalidated_total = Counter::with_opts(Opts::new(
            "stratum_sessions_invalidated_total",
            "Total number of sessions invalidated",
        ))?;

        let sessions_purged_total = CounterVec::new(
            Opts::new(
                "stratum_sessions_purged_total",
                "Expired sessions removed by the background purge",
            ),
            &["store"],
        )?;

        let id_collisions_total = Counter::with_opts(Opts::new(
            "stratum_id_collisions_total",
            "Generated session ids that collided with a live session",
        ))?;

        let health_checks_total = CounterVec::new(
            Opts::new(
                "stratum_health_checks_total",
                "Liveness probe requests",
            ),
            &["kind", "outcome"],
        )?;

        registry.register(Box::new(store_operations_total.clone()))?;
        registry.register(Box::new(chain_read_fallbacks_total.clone()))?;
        registry.register(Box::new(sessions_created_total.clone()))?;
        registry.register(Box::new(sessions_expired_total.clone()))?;
        registry.register(Box::new(sessions_invalidated_total.clone()))?;
        registry.register(Box::new(sessions_purged_total.clone()))?;
        registry.register(Box::new(id_collisions_total.clone()))?;
        registry.register(Box::new(health_checks_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            store_operations_total,
            chain_read_fallbacks_total,
            sessions_created_total,
            sessions_expired_total,
            sessions_invalidated_total,
            sessions_purged_total,
            id_collisions_total,
            health_checks_total,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one backing store call. `outcome` is `ok`, `transient` or `fatal`.
    pub fn record_store_operation(&self, store: &str, op: &str, outcome: &str) {
        self.store_operations_total
            .with_label_values(&[store, op, outcome])
            .inc();
    }

    pub fn record_read_fallback(&self, store: &str) {
        self.chain_read_fallbacks_total
            .with_label_values(&[store])
            .inc();
    }

    pub fn record_session_created(&self) {
        self.sessions_created_total.inc();
    }

    pub fn record_session_expired(&self) {
        self.sessions_expired_total.inc();
    }

    pub fn record_session_invalidated(&self) {
        self.sessions_invalidated_total.inc();
    }

    pub fn record_sessions_purged(&self, store: &str, count: u64) {
        self.sessions_purged_total
            .with_label_values(&[store])
            .inc_by(count as f64);
    }

    pub fn record_id_collision(&self) {
        self.id_collisions_total.inc();
    }

    pub fn record_health_check(&self, kind: &str, outcome: &str) {
        self.health_checks_total
            .with_label_values(&[kind, outcome])
            .inc();
    }
}
