//! HTTP surface: session routes behind the session middleware, the
//! metrics endpoint and the liveness probe

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Serialize;
use serde_json::Value;
use stratum_observability::{
    HealthState, LivenessState, Metrics, health_router, liveness_probe, trusted_only,
};
use stratum_session::Session;

use crate::middleware::{SessionHandle, SessionLayer, save_session};

/// JSON view of a session
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Option<String>,
    pub is_new: bool,
    pub attributes: BTreeMap<String, Value>,
}

impl SessionView {
    fn of(session: Option<&Session>) -> Self {
        match session {
            Some(session) => Self {
                id: Some(session.id().to_string()),
                is_new: session.is_new(),
                attributes: session
                    .record()
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            None => Self {
                id: None,
                is_new: false,
                attributes: BTreeMap::new(),
            },
        }
    }
}

/// Session store failure surfaced to the client
struct ApiError(stratum_core::Error);

impl From<stratum_core::Error> for ApiError {
    fn from(err: stratum_core::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("Session operation failed: {}", self.0);
        let status = if self.0.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.0.to_string()).into_response()
    }
}

async fn show_session(Extension(handle): Extension<SessionHandle>) -> Json<SessionView> {
    Json(
        handle
            .with_session(|session| SessionView::of(session.as_deref()))
            .await,
    )
}

async fn set_attribute(
    Extension(handle): Extension<SessionHandle>,
    Path(name): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<SessionView>, ApiError> {
    let view = handle
        .get_or_create(|session| {
            session.set_attribute(name, value);
            SessionView::of(Some(session))
        })
        .await?;
    Ok(Json(view))
}

async fn remove_attribute(
    Extension(handle): Extension<SessionHandle>,
    Path(name): Path<String>,
) -> StatusCode {
    let removed = handle
        .with_session(|session| session.and_then(|s| s.remove_attribute(&name)))
        .await;
    if removed.is_some() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn invalidate_session(
    Extension(handle): Extension<SessionHandle>,
) -> Result<StatusCode, ApiError> {
    handle.invalidate().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sessions(
    Extension(handle): Extension<SessionHandle>,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut ids: Vec<String> = handle
        .manager()
        .get_all_sessions()
        .await?
        .into_iter()
        .collect();
    ids.sort();
    Ok(Json(ids))
}

/// Assemble the application router.
///
/// `/sessions` exposes every live id, so only trusted peers may reach it.
pub fn build_app(session_layer: SessionLayer, metrics: Arc<Metrics>, liveness: LivenessState) -> Router {
    let operator_routes = Router::new()
        .route("/sessions", get(list_sessions))
        .route_layer(from_fn_with_state(liveness.config.clone(), trusted_only));

    let session_routes = Router::new()
        .route("/session", get(show_session).delete(invalidate_session))
        .route(
            "/session/{name}",
            put(set_attribute).delete(remove_attribute),
        )
        .merge(operator_routes)
        .layer(from_fn_with_state(session_layer, save_session));

    session_routes
        .merge(health_router(HealthState::new(metrics)))
        .layer(from_fn_with_state(liveness, liveness_probe))
}
