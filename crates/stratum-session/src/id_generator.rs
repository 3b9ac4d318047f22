//! Session identifier generation

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use crate::config::DEFAULT_ID_LENGTH_BYTES;

/// Produces candidate session identifiers.
///
/// Implementations only need to make collisions improbable; the manager
/// checks each candidate against the store chain before using it.
pub trait IdGenerator: Send + Sync {
    fn create_id(&self) -> String;
}

/// Generates ids from the thread-local CSPRNG, encoded as URL-safe base64
/// so they can travel in a cookie without escaping.
#[derive(Debug, Clone)]
pub struct SecureRandomIdGenerator {
    length_bytes: usize,
}

impl SecureRandomIdGenerator {
    pub fn new(length_bytes: usize) -> Self {
        Self { length_bytes }
    }

    pub fn length_bytes(&self) -> usize {
        self.length_bytes
    }
}

impl Default for SecureRandomIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH_BYTES)
    }
}

impl IdGenerator for SecureRandomIdGenerator {
    fn create_id(&self) -> String {
        let mut bytes = vec![0u8; self.length_bytes];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(&bytes)
    }
}
