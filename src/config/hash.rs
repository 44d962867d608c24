//! Hashing for secret comparison and plan fingerprints.
//!
//! Secret values are compared remotely by SHA-256 digest so the raw value
//! never has to leave the process except over a command's stdin.

use sha2::{Digest, Sha256};

/// Hasher for secret digests and plan fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hex SHA-256 digest of a value.
    #[must_use]
    pub fn digest(&self, value: &str) -> String {
        hex::encode(Sha256::digest(value.as_bytes()))
    }

    /// Hex SHA-256 over a sequence of fields.
    ///
    /// Fields are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    #[must_use]
    pub fn fingerprint<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> String {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the first 12 characters of a hash.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}
