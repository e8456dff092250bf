use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 32-byte identifier used for transaction ids, block ids, and addresses.
///
/// The core never derives consensus decisions from *how* this value was
/// produced — signing and hashing are supplied by the surrounding node
/// (SPEC_FULL.md §2) — but tests and the demo binary need a concrete,
/// deterministic way to mint one, so `keccak256` is kept as a convenience
/// constructor rather than a consensus primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes Keccak-256 hash of the provided data
    #[must_use]
    pub fn keccak256(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_all_zero_bytes() {
        assert!(Hash256::zero().is_zero());
        assert_eq!(Hash256::zero().to_string(), "0".repeat(64));
    }

    #[test]
    fn keccak256_is_deterministic_and_nonzero() {
        let a = Hash256::keccak256(b"ssfee-marker");
        let b = Hash256::keccak256(b"ssfee-marker");
        assert_eq!(a, b);
        assert!(!a.is_zero());
    }

    #[test]
    fn ordering_is_lexicographic_over_bytes() {
        let low = Hash256::from_bytes([0x01; 32]);
        let high = Hash256::from_bytes([0x02; 32]);
        assert!(low < high);
    }
}
