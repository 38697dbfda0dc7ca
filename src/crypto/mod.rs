//! Cryptographic utilities for the gateway.
//!
//! Hashing only: receipts commit to SHA-256 digests of canonical JSON,
//! never to raw request or response bodies.

mod hash;

pub use hash::{canonical_json_hash, canonicalize_json, sha256, sha256_hex, Hash256};
