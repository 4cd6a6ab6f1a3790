//! Input hashing for change detection.
//!
//! A resource's inputs hash covers its type tag and its substituted
//! properties. Properties are hashed as canonical JSON: object keys are
//! sorted, so two equal property trees always produce the same digest.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Hasher for computing resource input hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputHasher;

impl InputHasher {
    /// Creates a new input hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a resource's type and properties.
    #[must_use]
    pub fn hash(&self, resource_type: &str, properties: &BTreeMap<String, serde_json::Value>) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource_type.as_bytes());
        hasher.update([0u8]);

        let canonical = serde_json::Value::Object(
            properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        hasher.update(canonical.to_string().as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
