//! Session lifecycle notifications

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use crate::session::Session;

/// Receives session lifecycle events.
///
/// Callbacks run synchronously on the thread performing the operation.
/// A failing or panicking listener is logged and skipped; it never affects
/// the operation or the remaining listeners.
pub trait SessionListener: Send + Sync {
    fn session_created(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }

    fn session_destroyed(&self, _session: &Session) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Event {
    Created,
    Destroyed,
}

impl Event {
    fn as_str(self) -> &'static str {
        match self {
            Event::Created => "created",
            Event::Destroyed => "destroyed",
        }
    }
}

/// Registry of listeners, notified in registration order
#[derive(Default)]
pub struct SessionListeners {
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
}

impl SessionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn SessionListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|poisoned| {
            tracing::error!("Session listener lock poisoned, recovering");
            poisoned.into_inner()
        });
        listeners.push(listener);
    }

    /// Remove a previously registered listener. Returns false if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn SessionListener>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|poisoned| {
            tracing::error!("Session listener lock poisoned, recovering");
            poisoned.into_inner()
        });
        let target = Arc::as_ptr(listener) as *const ();
        match listeners
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
        {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_created(&self, session: &Session) {
        self.notify(Event::Created, session);
    }

    pub fn notify_destroyed(&self, session: &Session) {
        self.notify(Event::Destroyed, session);
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| {
                tracing::error!("Session listener lock poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }

    fn notify(&self, event: Event, session: &Session) {
        // Callbacks run outside the lock so a listener may register others
        for listener in self.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                Event::Created => listener.session_created(session),
                Event::Destroyed => listener.session_destroyed(session),
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(
                    session_id = %session.id(),
                    event = event.as_str(),
                    "Session listener failed: {:#}",
                    e
                ),
                Err(_) => tracing::error!(
                    session_id = %session.id(),
                    event = event.as_str(),
                    "Session listener panicked"
                ),
            }
        }
    }
}
