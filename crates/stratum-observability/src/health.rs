//! Health endpoints
//!
//! This module provides:
//! - The `/_ah/health` liveness probe, served by the [`liveness_probe`]
//!   middleware so the path matches in any letter case
//! - `/metrics` - Prometheus metrics endpoint
//!
//! The load balancer sends *remote* checks carrying an `IsLastSuccessful`
//! parameter; the outcome is recorded in a [`HealthCheckState`]. Agents
//! inside the host send *local* checks without the parameter, which succeed
//! only while a recent remote check reported success.

use axum::{
    Router,
    extract::{ConnectInfo, Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use stratum_core::Clock;

use crate::metrics::Metrics;

/// Path of the liveness probe, compared case-insensitively
pub const HEALTH_CHECK_PATH: &str = "/_ah/health";

const IS_LAST_SUCCESSFUL_PARAM: &str = "IsLastSuccessful";
const LINK_LOCAL_PREFIX: &str = "169.254";
const INTERVAL_OFFSET_RATIO: f64 = 1.5;

/// Liveness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Expected interval between remote checks, in seconds
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Trust every remote address
    #[serde(default)]
    pub dev_mode: bool,

    /// Address prefixes allowed to reach the probe
    #[serde(default = "default_trusted_prefixes")]
    pub trusted_prefixes: Vec<String>,

    /// Additional prefixes of the load balancer's health checkers
    #[serde(default = "default_health_check_prefixes")]
    pub health_check_prefixes: Vec<String>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            dev_mode: false,
            trusted_prefixes: default_trusted_prefixes(),
            health_check_prefixes: default_health_check_prefixes(),
        }
    }
}

impl HealthCheckConfig {
    /// Whether the address may make requests at all
    pub fn is_trusted(&self, remote_addr: Option<&str>) -> bool {
        if self.dev_mode {
            return true;
        }
        remote_addr.is_some_and(|addr| {
            self.trusted_prefixes
                .iter()
                .any(|prefix| addr.starts_with(prefix.as_str()))
        })
    }

    /// Whether the address may call the liveness probe
    pub fn is_valid_health_check_addr(&self, remote_addr: Option<&str>) -> bool {
        if self.is_trusted(remote_addr) {
            return true;
        }
        remote_addr.is_some_and(|addr| {
            self.health_check_prefixes
                .iter()
                .any(|prefix| addr.starts_with(prefix.as_str()))
        })
    }

    /// Maximum age of the last remote check for a local check to pass
    pub fn staleness_limit_millis(&self) -> i64 {
        (self.check_interval_secs as f64 * INTERVAL_OFFSET_RATIO * 1000.0) as i64
    }
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_trusted_prefixes() -> Vec<String> {
    ["172.17.", LINK_LOCAL_PREFIX, "127.0.0."]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_health_check_prefixes() -> Vec<String> {
    (0..4).map(|n| format!("130.211.{n}.")).collect()
}

/// Outcome of the most recent remote check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastCheck {
    pub successful: bool,
    pub at_millis: i64,
}

/// Process-wide record of the last remote health check.
///
/// Starts unset; updated on every remote probe.
#[derive(Debug, Default)]
pub struct HealthCheckState {
    last: Mutex<Option<LastCheck>>,
}

impl HealthCheckState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, successful: bool, at_millis: i64) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Health check state lock poisoned, recovering");
            poisoned.into_inner()
        });
        *last = Some(LastCheck {
            successful,
            at_millis,
        });
    }

    pub fn last(&self) -> Option<LastCheck> {
        *self.last.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Health check state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Evaluate a local check at `now`, returning the reason when unhealthy
    pub fn evaluate(&self, now: i64, staleness_limit_millis: i64) -> Result<(), String> {
        match self.last() {
            None => Err("no incoming remote health checks seen yet".to_string()),
            Some(check) if !check.successful => {
                Err("last remote health check was unsuccessful".to_string())
            }
            Some(check) => {
                let age = now - check.at_millis;
                if age > staleness_limit_millis {
                    Err(format!("last incoming health check was {age}ms ago"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// State for the liveness probe middleware
#[derive(Clone)]
pub struct LivenessState {
    pub config: Arc<HealthCheckConfig>,
    pub checks: Arc<HealthCheckState>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<Arc<Metrics>>,
}

impl LivenessState {
    pub fn new(config: HealthCheckConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            checks: Arc::new(HealthCheckState::new()),
            clock,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_metric(&self, kind: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_health_check(kind, outcome);
        }
    }
}

/// Reject requests whose peer is outside the trusted prefixes
pub async fn trusted_only(
    State(config): State<Arc<HealthCheckConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let remote_addr = peer_ip(&req);
    if config.is_trusted(remote_addr.as_deref()) {
        return next.run(req).await;
    }

    tracing::warn!(
        remote_addr = remote_addr.as_deref().unwrap_or("unknown"),
        path = %req.uri().path(),
        "Rejected request from untrusted address"
    );
    (StatusCode::FORBIDDEN, "403 Forbidden").into_response()
}

fn peer_ip(req: &Request) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Liveness probe middleware.
///
/// Requests to any other path pass straight through.
pub async fn liveness_probe(
    State(state): State<LivenessState>,
    req: Request,
    next: Next,
) -> Response {
    if !req.uri().path().eq_ignore_ascii_case(HEALTH_CHECK_PATH) {
        return next.run(req).await;
    }

    let remote_addr = peer_ip(&req);
    let remote_addr = remote_addr.as_deref();

    if !state.config.is_valid_health_check_addr(remote_addr) {
        tracing::warn!(
            remote_addr = remote_addr.unwrap_or("unknown"),
            "Rejected health check from untrusted address"
        );
        state.record_metric("rejected", "forbidden");
        return (StatusCode::FORBIDDEN, "403 Forbidden").into_response();
    }

    let params = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();
    let is_last_successful = params.get(IS_LAST_SUCCESSFUL_PARAM);
    let link_local = remote_addr.is_some_and(|addr| addr.starts_with(LINK_LOCAL_PREFIX));

    let now = state.clock.now_millis();

    match is_last_successful {
        None if !link_local => {
            match state
                .checks
                .evaluate(now, state.config.staleness_limit_millis())
            {
                Ok(()) => {
                    state.record_metric("local", "healthy");
                    ok_response()
                }
                Err(reason) => {
                    tracing::warn!("unhealthy ({})", reason);
                    state.record_metric("local", "unhealthy");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        value => {
            let successful = match value.map(String::as_str) {
                Some(v) if v.eq_ignore_ascii_case("yes") => true,
                Some(v) if v.eq_ignore_ascii_case("no") => false,
                other => {
                    tracing::warn!(
                        value = other.unwrap_or("<missing>"),
                        "Wrong parameter for {}",
                        IS_LAST_SUCCESSFUL_PARAM
                    );
                    false
                }
            };
            state.checks.record(successful, now);
            state.record_metric("remote", if successful { "yes" } else { "no" });
            ok_response()
        }
    }
}

fn ok_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        "ok",
    )
        .into_response()
}

/// Health check state
#[derive(Clone)]
pub struct HealthState {
    /// Metrics collector
    pub metrics: Arc<Metrics>,
}

impl HealthState {
    /// Create a new health state
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

/// Create the metrics router
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Prometheus metrics handler
///
/// Returns metrics in Prometheus text format
async fn metrics_handler(State(state): State<HealthState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", err),
        )
            .into_response(),
    }
}
