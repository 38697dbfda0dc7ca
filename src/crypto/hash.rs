//! Deterministic hashing over canonical JSON.
//!
//! Input and output hashes stored on receipts must be reproducible across
//! processes and languages, so JSON is canonicalized per RFC 8785 (JCS)
//! before hashing:
//! - Deterministic key ordering (lexicographic UTF-8)
//! - ES6-compatible number serialization
//! - No insignificant whitespace

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

/// Hash raw bytes with SHA-256.
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of raw bytes as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Convert a JSON value to its canonical string representation per RFC 8785.
///
/// # Panics
///
/// Panics if the value contains a float that cannot be represented (NaN or
/// Infinity). Per RFC 8785 these are not valid JSON.
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    serde_json_canonicalizer::to_string(value)
        .expect("Failed to canonicalize JSON - contains invalid values (NaN or Infinity)")
}

/// SHA-256 over the canonical JSON form of `value`, as lowercase hex.
///
/// Key insertion order does not affect the result.
pub fn canonical_json_hash(value: &serde_json::Value) -> String {
    sha256_hex(canonicalize_json(value).as_bytes())
}
