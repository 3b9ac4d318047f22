//! Stratum Layered Session Management
//!
//! This crate turns a set of backing stores into durable HTTP session
//! storage:
//! - `StoreChain`: write-through in write order, fallback reads in read order
//! - `IdGenerator`: cryptographically random session identifiers
//! - `SessionManager`: create, load, save and invalidate sessions
//! - `SessionListeners`: create/destroy notifications
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum_core::SystemClock;
//! use stratum_session::{SessionManager, SessionManagerConfig, StoreChain};
//!
//! let chain = StoreChain::new(vec![durable, cache], Arc::new(SystemClock));
//! let manager = SessionManager::new(chain, SessionManagerConfig::default())?;
//!
//! let mut session = manager.create_session(None).await?;
//! session.set_attribute("user", "alice");
//! manager.save_session(&mut session).await?;
//! ```

mod chain;
mod config;
mod id_generator;
mod listener;
mod manager;
mod session;

pub use chain::StoreChain;
pub use config::{DEFAULT_MAX_ID_ATTEMPTS, DEFAULT_TIMEOUT_MINUTES, SessionManagerConfig};
pub use id_generator::{IdGenerator, SecureRandomIdGenerator};
pub use listener::{SessionListener, SessionListeners};
pub use manager::SessionManager;
pub use session::Session;
