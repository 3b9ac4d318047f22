//! Stratum Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by every
//! Stratum crate:
//! - The persisted session record
//! - The backing store capability set implemented by each tier
//! - Core error types and their transient/fatal classification
//! - Clock abstraction used for expiration decisions

pub mod clock;
pub mod error;
pub mod record;
pub mod session_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use record::SessionRecord;
pub use session_store::{BackingStore, SESSION_PREFIX, session_id_from_key, session_key};
