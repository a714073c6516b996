//! Content fingerprints for telemetry.
//!
//! A fingerprint is the lower-case hex SHA-256 of the exact bytes, truncated to
//! [`FINGERPRINT_LEN`] characters.

use crate::types::Variables;
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest (64 bits).
pub const FINGERPRINT_LEN: usize = 16;

/// Fingerprint of raw bytes.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Fingerprint of a string's UTF-8 bytes.
pub fn fingerprint(text: &str) -> String {
    fingerprint_bytes(text.as_bytes())
}

/// Stable serialization of variable bindings: a JSON object with sorted keys.
pub fn serialize_variables(variables: &Variables) -> String {
    // Serializing a string map cannot fail.
    serde_json::to_string(variables).unwrap_or_default()
}

/// Fingerprint of variable bindings, independent of insertion order.
pub fn fingerprint_variables(variables: &Variables) -> String {
    fingerprint(&serialize_variables(variables))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_fingerprint() {
        assert_eq!(fingerprint("Hola"), fingerprint("Hola"));
        assert_eq!(fingerprint("Hola").len(), FINGERPRINT_LEN);
    }

    #[test]
    fn different_input_different_fingerprint() {
        assert_ne!(fingerprint("Hola"), fingerprint("Hola "));
        assert_ne!(fingerprint(""), fingerprint("\0"));
    }

    #[test]
    fn matches_known_sha256_prefix() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(fingerprint("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn variables_fingerprint_ignores_insertion_order() {
        let mut a = Variables::new();
        a.insert("input".into(), "Hello".into());
        a.insert("specification".into(), "to Spanish".into());

        let mut b = Variables::new();
        b.insert("specification".into(), "to Spanish".into());
        b.insert("input".into(), "Hello".into());

        assert_eq!(fingerprint_variables(&a), fingerprint_variables(&b));
        assert_eq!(
            serialize_variables(&a),
            r#"{"input":"Hello","specification":"to Spanish"}"#
        );
    }

    #[test]
    fn variables_fingerprint_tracks_values() {
        let mut a = Variables::new();
        a.insert("input".into(), "Hello".into());
        let mut b = a.clone();
        b.insert("input".into(), "Hello!".into());
        assert_ne!(fingerprint_variables(&a), fingerprint_variables(&b));
    }
}
