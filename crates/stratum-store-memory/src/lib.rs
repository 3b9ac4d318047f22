//! In-memory cache tier for Stratum session storage
//!
//! `MemoryCacheStore` is the fast, volatile tier of the store chain. Records
//! are kept encoded, exactly as a remote cache would hold them, so decoding
//! failures surface the same way they would over the wire.

mod memory_store;

pub use memory_store::{MemoryCacheConfig, MemoryCacheStore};
