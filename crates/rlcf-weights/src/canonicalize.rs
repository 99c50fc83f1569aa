//! # Canonical Fingerprints for Weight Documents
//!
//! Every saved weight version carries a SHA-256 fingerprint of its canonical
//! JSON form. Two documents with identical content always share a fingerprint,
//! regardless of how they were built or in which order their maps were filled.
//!
//! ## Canonical Form
//!
//! 1. The document is converted to a `serde_json::Value`
//! 2. Object keys are emitted in sorted order (the default `serde_json` map)
//! 3. No insignificant whitespace
//!
//! ## References
//!
//! - **RFC 8785** - "JSON Canonicalization Scheme (JCS)"
//!   <https://www.rfc-editor.org/rfc/rfc8785>
//! - **NIST FIPS 180-4** - SHA-256.

use crate::models::{Result, WeightConfig};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Serializes any value into its canonical JSON string.
///
/// # Example
///
/// ```rust
/// use rlcf_weights::canonicalize::canonical_json;
/// use serde_json::json;
///
/// assert_eq!(canonical_json(&json!({"b": 1, "a": 2})).unwrap(), r#"{"a":2,"b":1}"#);
/// ```
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Hex-encoded SHA-256 over the canonical JSON of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonical_json(value)?;
    let digest = Sha256::digest(canonical.as_bytes());

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing into a String cannot fail.
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

/// Fingerprint of a weight document.
pub fn config_fingerprint(config: &WeightConfig) -> Result<String> {
    fingerprint(config)
}
