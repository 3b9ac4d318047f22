//! Session middleware
//!
//! Resolves the session named by the request cookie, hands it to the
//! handler through a [`SessionHandle`] extension and writes it back once
//! the handler has produced a response, whatever that response is.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use stratum_core::Result;
use stratum_session::{Session, SessionManager};
use tokio::sync::Mutex;

const RETRY_BACKOFF_MS: u64 = 25;

/// Middleware state
#[derive(Clone)]
pub struct SessionLayer {
    pub manager: Arc<SessionManager>,
    pub cookie_name: Arc<str>,
    pub save_attempts: u32,
}

impl SessionLayer {
    pub fn new(manager: Arc<SessionManager>, cookie_name: &str, save_attempts: u32) -> Self {
        Self {
            manager,
            cookie_name: Arc::from(cookie_name),
            save_attempts,
        }
    }
}

#[derive(Default)]
struct HandleState {
    session: Option<Session>,
    /// Created during this request; the client needs the cookie
    issued: bool,
    invalidated: bool,
}

/// Per-request access to the current session
#[derive(Clone)]
pub struct SessionHandle {
    manager: Arc<SessionManager>,
    state: Arc<Mutex<HandleState>>,
}

impl SessionHandle {
    fn new(manager: Arc<SessionManager>, session: Option<Session>) -> Self {
        Self {
            manager,
            state: Arc::new(Mutex::new(HandleState {
                session,
                ..Default::default()
            })),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Run `f` against the current session, if there is one
    pub async fn with_session<R>(&self, f: impl FnOnce(Option<&mut Session>) -> R) -> R {
        let mut state = self.state.lock().await;
        f(state.session.as_mut())
    }

    /// Run `f` against the current session, creating one first if needed
    pub async fn get_or_create<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let session = match state.session.take() {
            Some(session) => session,
            None => {
                let session = self.manager.create_session(None).await?;
                state.issued = true;
                state.invalidated = false;
                session
            }
        };
        Ok(f(state.session.insert(session)))
    }

    /// Invalidate the current session, if any
    pub async fn invalidate(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(id) = state.session.as_ref().map(|s| s.id().to_string()) else {
            return Ok(());
        };

        // Keep the session bound to the request until the stores agree
        self.manager.invalidate_session(&id).await?;
        state.session = None;
        state.issued = false;
        state.invalidated = true;
        Ok(())
    }

    /// Save the session and return the `Set-Cookie` value the response needs
    async fn finish(&self, layer: &SessionLayer) -> Option<String> {
        let mut state = self.state.lock().await;
        let issued = state.issued;

        if state.invalidated && state.session.is_none() {
            return Some(format!(
                "{}=; Path=/; HttpOnly; Max-Age=0",
                layer.cookie_name
            ));
        }

        let session = state.session.as_mut()?;
        if let Err(e) = save_with_retry(&layer.manager, session, layer.save_attempts).await {
            tracing::error!(
                session_id = %session.id(),
                "Failed to save session at end of request: {}",
                e
            );
        }

        issued.then(|| format!("{}={}; Path=/; HttpOnly", layer.cookie_name, session.id()))
    }
}

async fn save_with_retry(manager: &SessionManager, session: &mut Session, attempts: u32) -> Result<()> {
    let mut attempt = 1;
    loop {
        match manager.save_session(session).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    session_id = %session.id(),
                    attempt,
                    "Transient failure saving session, retrying: {}",
                    e
                );
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Extract the session id from the request cookies
pub fn session_id_from_cookies(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Load the request's session, run the handler, then save the session
pub async fn save_session(State(layer): State<SessionLayer>, mut req: Request, next: Next) -> Response {
    let session = match session_id_from_cookies(req.headers(), &layer.cookie_name) {
        Some(id) => match layer.manager.get_session(&id).await {
            Ok(session) => {
                if session.is_none() {
                    tracing::debug!(session_id = %id, "Requested session not found");
                }
                session
            }
            Err(e) => {
                tracing::error!(session_id = %id, "Failed to load session: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Session store unavailable")
                    .into_response();
            }
        },
        None => None,
    };

    let handle = SessionHandle::new(layer.manager.clone(), session);
    req.extensions_mut().insert(handle.clone());

    let mut response = next.run(req).await;

    if let Some(cookie) = handle.finish(&layer).await {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("Invalid session cookie value: {}", e),
        }
    }

    response
}
