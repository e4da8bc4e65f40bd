//! Opaque job identifiers.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// An opaque 12-hex-character job identifier.
///
/// Bounded length keeps status/progress/download URLs short while remaining
/// collision-resistant for the in-memory job population a single process
/// handles concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a new random 12-hex-character job id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wraps an existing id string, e.g. one round-tripped from a client.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrows the id as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_twelve_hex_chars() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }
}
