//! Session lifecycle on top of a store chain

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stratum_core::{Error, Result, SessionRecord};
use stratum_observability::Metrics;

use crate::chain::StoreChain;
use crate::config::SessionManagerConfig;
use crate::id_generator::{IdGenerator, SecureRandomIdGenerator};
use crate::listener::{SessionListener, SessionListeners};
use crate::session::Session;

/// Timeout applied when the configured timeout is zero or negative
const UNBOUNDED_TIMEOUT_MILLIS: i64 = i32::MAX as i64 * 1000;

/// Creates, loads, saves and invalidates sessions.
///
/// The manager is shared by all request handlers; every method takes
/// `&self`. Concurrent saves of the same session are last-writer-wins.
pub struct SessionManager {
    chain: StoreChain,
    id_generator: Arc<dyn IdGenerator>,
    listeners: SessionListeners,
    default_timeout_minutes: AtomicI64,
    max_id_attempts: u32,
    metrics: Option<Arc<Metrics>>,
}

impl SessionManager {
    /// Create a manager over `chain`; rejects configurations that would
    /// weaken session ids or never attempt to generate one
    pub fn new(chain: StoreChain, config: SessionManagerConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        Ok(Self {
            chain,
            id_generator: Arc::new(SecureRandomIdGenerator::new(config.id_length_bytes)),
            listeners: SessionListeners::new(),
            default_timeout_minutes: AtomicI64::new(config.default_timeout_minutes),
            max_id_attempts: config.max_id_attempts,
            metrics: None,
        })
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn chain(&self) -> &StoreChain {
        &self.chain
    }

    pub fn listeners(&self) -> &SessionListeners {
        &self.listeners
    }

    pub fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_session_listener(&self, listener: &Arc<dyn SessionListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn default_timeout_minutes(&self) -> i64 {
        self.default_timeout_minutes.load(Ordering::Relaxed)
    }

    /// Change the timeout applied to sessions created or saved from now on
    pub fn set_default_timeout(&self, minutes: i64) {
        self.default_timeout_minutes.store(minutes, Ordering::Relaxed);
    }

    /// Effective session lifetime in milliseconds
    pub fn session_timeout_millis(&self) -> i64 {
        let minutes = self.default_timeout_minutes();
        if minutes <= 0 {
            UNBOUNDED_TIMEOUT_MILLIS
        } else {
            minutes.saturating_mul(60 * 1000)
        }
    }

    /// Generate an id that no tier currently holds a live session for
    pub async fn create_id(&self) -> Result<String> {
        for attempt in 1..=self.max_id_attempts {
            let candidate = self.id_generator.create_id();
            if self.chain.load(&candidate).await?.is_none() {
                return Ok(candidate);
            }

            tracing::debug!(attempt, "Session id collision, generating another");
            if let Some(metrics) = &self.metrics {
                metrics.record_id_collision();
            }
        }

        tracing::error!(
            attempts = self.max_id_attempts,
            "Unable to generate a unique session id"
        );
        Err(Error::IdSpaceExhausted {
            attempts: self.max_id_attempts,
        })
    }

    /// Create and persist a new, empty session.
    ///
    /// A caller-supplied id is used as given without a collision check.
    pub async fn create_session(&self, requested_id: Option<&str>) -> Result<Session> {
        let id = match requested_id {
            Some(id) => id.to_string(),
            None => self.create_id().await?,
        };

        let now = self.chain.clock().now_millis();
        let record = SessionRecord::new(now, self.session_timeout_millis());
        self.chain.save(&id, &record).await?;

        let session = Session::created(id, record);
        tracing::debug!(session_id = %session.id(), "Session created");
        if let Some(metrics) = &self.metrics {
            metrics.record_session_created();
        }
        self.listeners.notify_created(&session);

        Ok(session)
    }

    /// Load a live session, or `None` if it is absent or expired
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .chain
            .load(session_id)
            .await?
            .map(|record| Session::loaded(session_id.to_string(), record)))
    }

    /// Persist a dirty session and slide its expiration forward.
    ///
    /// Returns whether anything was written. A clean session is a no-op.
    /// On failure the session stays dirty so the caller may retry.
    pub async fn save_session(&self, session: &mut Session) -> Result<bool> {
        if !session.is_dirty() {
            return Ok(false);
        }

        let now = self.chain.clock().now_millis();
        let timeout = self.session_timeout_millis();
        let record = session.record_mut();
        record.last_access_time = now;
        record.expiration_time = now.saturating_add(timeout);

        self.chain.save(session.id(), session.record()).await?;
        session.mark_saved();
        tracing::debug!(
            session_id = %session.id(),
            expiration_time = session.expiration_time(),
            "Session saved"
        );

        Ok(true)
    }

    /// Remove a session from every tier.
    ///
    /// Idempotent; listeners hear about the destruction only if the
    /// session was live.
    pub async fn invalidate_session(&self, session_id: &str) -> Result<()> {
        let existing = match self.chain.load(session_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Could not load session before invalidation: {}", e);
                None
            }
        };

        self.chain.delete(session_id).await?;

        if let Some(record) = existing {
            let session = Session::loaded(session_id.to_string(), record);
            tracing::debug!(session_id = %session_id, "Session invalidated");
            if let Some(metrics) = &self.metrics {
                metrics.record_session_invalidated();
            }
            self.listeners.notify_destroyed(&session);
        }

        Ok(())
    }

    /// Ids of all live sessions, from the first tier able to enumerate
    pub async fn get_all_sessions(&self) -> Result<HashSet<String>> {
        Ok(self.chain.get_all().await?.into_keys().collect())
    }

    /// Sessions held only in memory. This manager persists every session,
    /// so the set is always empty.
    pub fn get_transient_sessions(&self) -> HashSet<String> {
        HashSet::new()
    }
}
