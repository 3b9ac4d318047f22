//! Stratum Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Liveness probe with trusted-address filtering
//! - Trusted-address guard for operator routes
//! - Metrics endpoint

pub mod health;
pub mod metrics;

pub use health::{
    HEALTH_CHECK_PATH, HealthCheckConfig, HealthCheckState, HealthState, LastCheck, LivenessState,
    health_router, liveness_probe, trusted_only,
};
pub use metrics::Metrics;
