use bastion_types::{canonical_bytes, canonical_bytes_without, Sha256Digest};
use serde_json::Value;

use crate::error::CryptoError;

/// SHA-256 over canonical JSON.
///
/// Unlike a domain-separated hasher, no tag is prepended: external validators
/// must be able to recompute every hash from the record alone, using nothing
/// but "sorted keys, no whitespace, SHA-256".
pub struct CanonicalHasher {
    excluded: &'static [&'static str],
}

impl CanonicalHasher {
    /// Hasher for ledger entries: covers everything but `hash` and `signature`.
    pub const LEDGER_ENTRY: Self = Self {
        excluded: &["hash", "signature"],
    };

    /// Hasher for values that are hashed whole.
    pub const WHOLE: Self = Self { excluded: &[] };

    /// Create a hasher that drops the given top-level keys before hashing.
    pub const fn excluding(excluded: &'static [&'static str]) -> Self {
        Self { excluded }
    }

    /// Hash a JSON value.
    pub fn hash_value(&self, value: &Value) -> Result<Sha256Digest, CryptoError> {
        let bytes = canonical_bytes_without(value, self.excluded)?;
        Ok(Sha256Digest::of(&bytes))
    }

    /// Hash any serializable value.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Sha256Digest, CryptoError> {
        if self.excluded.is_empty() {
            return Ok(Sha256Digest::of(&canonical_bytes(value)?));
        }
        let tree = serde_json::to_value(value).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        self.hash_value(&tree)
    }

    /// Check a value against an expected digest.
    pub fn verify<T: serde::Serialize>(&self, value: &T, expected: &Sha256Digest) -> bool {
        matches!(self.hash_json(value), Ok(actual) if actual == *expected)
    }

    /// The top-level keys this hasher ignores.
    pub fn excluded(&self) -> &[&str] {
        self.excluded
    }
}
