//! SHA-256 identity hashes and Blake3 content keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::determinism::{CanonicalJsonError, to_canonical_string};

/// Size of both hash outputs in bytes.
pub const HASH_SIZE: usize = 32;

/// Type alias for a 32-byte hash.
pub type Hash = [u8; HASH_SIZE];

/// Hex prefix carried by every published identity hash.
pub const HASH_PREFIX: &str = "0x";

/// Number of hash bytes kept in an idempotency key.
const IDEMPOTENCY_KEY_BYTES: usize = 16;

/// SHA-256 of `content`.
#[must_use]
pub fn sha256(content: &[u8]) -> Hash {
    Sha256::digest(content).into()
}

/// SHA-256 of `content` as `0x`-prefixed lowercase hex.
#[must_use]
pub fn sha256_hex(content: &[u8]) -> String {
    format!("{HASH_PREFIX}{}", hex::encode(sha256(content)))
}

/// SHA-256 of the canonical JSON form of `value`, `0x`-prefixed.
///
/// # Errors
///
/// Returns an error if `value` falls outside the canonical JSON profile.
pub fn sha256_canonical<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalJsonError> {
    Ok(sha256_hex(to_canonical_string(value)?.as_bytes()))
}

/// Blake3 hasher for content addressing and idempotency keys.
pub struct ContentHasher;

impl ContentHasher {
    /// Hashes raw content.
    #[must_use]
    pub fn hash_content(content: &[u8]) -> Hash {
        *blake3::hash(content).as_bytes()
    }

    /// Hashes the canonical JSON form of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` falls outside the canonical JSON profile.
    pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<Hash, CanonicalJsonError> {
        Ok(Self::hash_content(to_canonical_string(value)?.as_bytes()))
    }

    /// Derives a fixed-length reference id for `value` within `domain`.
    ///
    /// The hash covers `domain || 0x00 || canonical(value)`, so equal values
    /// in different domains never collide. The result reads
    /// `<domain>:<32 hex chars>` and stays short whatever the input size.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` falls outside the canonical JSON profile.
    pub fn idempotency_key<T: Serialize + ?Sized>(
        domain: &str,
        value: &T,
    ) -> Result<String, CanonicalJsonError> {
        let canonical = to_canonical_string(value)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(&[0]);
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Ok(format!(
            "{domain}:{}",
            hex::encode(&digest.as_bytes()[..IDEMPOTENCY_KEY_BYTES])
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_hash_ignores_field_order() {
        let a = sha256_canonical(&json!({ "a": 1, "b": [1, 2] })).unwrap();
        let b = sha256_canonical(&json!({ "b": [1, 2], "a": 1 })).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn test_idempotency_key_is_domain_separated() {
        let payload = json!({ "event": "evt-1" });
        let k1 = ContentHasher::idempotency_key("webhook", &payload).unwrap();
        let k2 = ContentHasher::idempotency_key("webhook", &payload).unwrap();
        let other = ContentHasher::idempotency_key("bout", &payload).unwrap();

        assert_eq!(k1, k2);
        assert!(k1.starts_with("webhook:"));
        assert_eq!(k1.len(), "webhook:".len() + IDEMPOTENCY_KEY_BYTES * 2);
        assert_ne!(k1[8..], other[5..]);
    }

    #[test]
    fn test_hash_canonical_rejects_floats() {
        assert_eq!(
            ContentHasher::hash_canonical(&json!({ "x": 0.5 })),
            Err(CanonicalJsonError::FloatNotAllowed)
        );
    }
}
