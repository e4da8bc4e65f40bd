//! Deterministic identity for an upload, used to deduplicate equivalent submissions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sort order requested for the source pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    /// Pages are composed in their original order.
    Norm,
    /// Pages are reversed before composition.
    Rev,
}

impl Order {
    /// Parses a case-insensitive wire value (`"Norm"` / `"Rev"`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NORM" => Some(Self::Norm),
            "REV" => Some(Self::Rev),
            _ => None,
        }
    }

    /// Canonical upper-cased wire representation, used in the fingerprint's
    /// canonical serialization and in output filenames.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Norm => "NORM",
            Self::Rev => "REV",
        }
    }
}

/// Normalized identity of an upload: `(fileName, sizeBytes, rotation, order)`.
///
/// Equality is field-wise after normalization: `fileName` is trimmed, `order`
/// is upper-cased. A 256-bit digest of the canonical serialization is used as
/// the map key so the registry never stores unbounded-length strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    file_name: String,
    size_bytes: i64,
    rotation: u16,
    order: Order,
}

/// A 256-bit digest of a [`Fingerprint`]'s canonical serialization.
///
/// This is the actual registry key: bounding key size protects the registry's
/// maps from unbounded filename lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintDigest([u8; 32]);

impl FingerprintDigest {
    /// Renders the digest as a lowercase hex string, e.g. for log fields.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for FingerprintDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Fingerprint {
    /// Normalizes raw submission fields into a [`Fingerprint`].
    ///
    /// `rotation` is taken modulo 360 so that `360` and `0` fingerprint
    /// identically, matching the wire contract's `0..360` range.
    pub fn new(file_name: impl Into<String>, size_bytes: i64, rotation: u16, order: Order) -> Self {
        Self {
            file_name: file_name.into().trim().to_string(),
            size_bytes,
            rotation: rotation % 360,
            order,
        }
    }

    /// Canonical serialization digested for the registry key:
    /// `name\nsize\nrotation\norder`.
    fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.file_name,
            self.size_bytes,
            self.rotation,
            self.order.as_str()
        )
    }

    /// Computes the SHA-256 digest of the canonical serialization.
    ///
    /// A cryptographically strong hash is used rather than a weaker
    /// concatenation-based scheme so the registry key remains collision-safe
    /// even if the registry is ever exposed across a trust boundary.
    pub fn digest(&self) -> FingerprintDigest {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let bytes: [u8; 32] = hasher.finalize().into();
        FingerprintDigest(bytes)
    }

    /// Returns the normalized (trimmed) file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the normalized rotation angle in `0..360`.
    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    /// Returns the requested page order.
    pub fn order(&self) -> Order {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_for_equal_inputs() {
        let a = Fingerprint::new("report.pdf", 4096, 90, Order::Norm);
        let b = Fingerprint::new("report.pdf", 4096, 90, Order::Norm);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_normalizes_whitespace_and_case() {
        let a = Fingerprint::new("  report.pdf  ", 4096, 0, Order::Norm);
        let b = Fingerprint::new("report.pdf", 4096, 0, Order::Norm);
        assert_eq!(a.digest(), b.digest());

        let c = Fingerprint::new("report.pdf", 4096, 0, Order::Rev);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn digest_differs_for_different_rotation() {
        let a = Fingerprint::new("report.pdf", 4096, 0, Order::Norm);
        let b = Fingerprint::new("report.pdf", 4096, 90, Order::Norm);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn rotation_wraps_modulo_360() {
        let a = Fingerprint::new("report.pdf", 4096, 360, Order::Norm);
        let b = Fingerprint::new("report.pdf", 4096, 0, Order::Norm);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn order_parse_is_case_insensitive() {
        assert_eq!(Order::parse("norm"), Some(Order::Norm));
        assert_eq!(Order::parse("REV"), Some(Order::Rev));
        assert_eq!(Order::parse("sideways"), None);
    }
}
