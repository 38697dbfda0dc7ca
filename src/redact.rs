//! Secret scrubbing for request and response bodies.
//!
//! Receipts commit to hashes of *redacted* payloads: any value stored under
//! a denylisted key is replaced with a sentinel before canonicalization and
//! hashing, so raw secrets never reach a persisted field. Key comparison is
//! case-insensitive and nested structures are walked recursively. All
//! functions return new values; inputs are never mutated.

use std::collections::HashSet;
use std::sync::LazyLock;

use serde_json::Value;

use crate::crypto::canonical_json_hash;

/// Replacement for redacted values.
pub const REDACTED_SENTINEL: &str = "[REDACTED]";

/// Curated registry of credential-bearing field names.
static REDACT_KEYS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "authorization",
        "api_key",
        "api-key",
        "token",
        "password",
        "secret",
        "credential",
        "credentials",
        "access_token",
        "refresh_token",
        "client_secret",
        "private_key",
        "x-api-key",
        "x_api_key",
        "bearer",
        "session_token",
        "signing_key",
    ])
});

fn is_sensitive(key: &str, extra_denylist: &[&str]) -> bool {
    let lower = key.to_lowercase();
    REDACT_KEYS.contains(lower.as_str()) || extra_denylist.iter().any(|k| *k == lower)
}

/// Recursively redact sensitive keys in a JSON value.
///
/// `extra_denylist` entries (lowercase) are applied in addition to the
/// built-in registry, never instead of it.
pub fn redact_value(value: &Value, extra_denylist: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_sensitive(k, extra_denylist) {
                        (k.clone(), Value::String(REDACTED_SENTINEL.to_string()))
                    } else {
                        (k.clone(), redact_value(v, extra_denylist))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_value(item, extra_denylist))
                .collect(),
        ),
        // Scalars carry no key context and pass through unchanged.
        other => other.clone(),
    }
}

/// Redact a JSON value with the built-in denylist only.
pub fn redact(value: &Value) -> Value {
    redact_value(value, &[])
}

/// Deterministic SHA-256 hex digest of `value` after redaction.
///
/// Key insertion order does not affect the result: the redacted value is
/// canonicalized (RFC 8785) before hashing.
pub fn hash_redacted(value: &Value) -> String {
    canonical_json_hash(&redact(value))
}
