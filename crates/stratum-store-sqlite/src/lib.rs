//! SQLite-backed durable tier for Stratum session storage
//!
//! This crate implements the `BackingStore` trait on top of a SQLite
//! database, giving the store chain a tier that survives process restarts.
//!
//! # Features
//! - Upsert semantics (last write wins per key)
//! - Synchronous writes, or deferred writes batched by a background worker
//! - Enumeration of all stored sessions
//! - Purging of expired rows
//!
//! # Example
//! ```no_run
//! # use stratum_store_sqlite::{SqliteSessionStore, SqliteStoreConfig};
//! # async fn example() -> stratum_core::Result<()> {
//! let store = SqliteSessionStore::new(SqliteStoreConfig::new("/var/lib/stratum/sessions.db")).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod deferred;
mod sqlite_session_store;

pub use config::{SqliteStoreConfig, WriteMode};
pub use sqlite_session_store::SqliteSessionStore;
