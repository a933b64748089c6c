//! Stable record ids.
//!
//! A record id is the SHA-512 of an offering's canonical identity encoding,
//! rendered as URL-safe base64 without padding. The same id keys the search
//! document and every idempotency marker for the offering.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Incremental SHA-512 over a sequence of fields.
///
/// Every field is written as its byte length (u64, little endian) followed
/// by the bytes, so no two field sequences share an encoding.
#[derive(Clone, Default)]
pub struct CanonicalHasher(Sha512);

impl CanonicalHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

/// Encode raw hash bytes as URL-safe base64 without padding.
///
/// Equivalent to standard base64 with `+` replaced by `-`, `/` replaced
/// by `_`, and trailing `=` stripped.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic identifier of an offering's search document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Build a record id from raw hash bytes.
    pub fn from_hash(hash: &[u8]) -> Self {
        Self(encode_url_safe(hash))
    }

    /// Wrap an already encoded id (e.g. one read back from storage).
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn test_encoding_matches_replacement_rule() {
        // Bytes chosen so the standard alphabet produces '+', '/' and padding.
        let bytes = [0xfb, 0xff, 0xbf, 0xfe, 0x10];
        let standard = STANDARD.encode(bytes);
        assert!(standard.contains('+') || standard.contains('/'));
        assert!(standard.ends_with('='));

        let expected = standard
            .replace('+', "-")
            .replace('/', "_")
            .trim_end_matches('=')
            .to_string();
        assert_eq!(encode_url_safe(&bytes), expected);
    }

    #[test]
    fn test_sha512_length() {
        let hash = CanonicalHasher::new().field("offering").finish();
        assert_eq!(hash.len(), 64);
        // 64 bytes -> 86 base64 chars without padding
        assert_eq!(RecordId::from_hash(&hash).as_str().len(), 86);
    }

    #[test]
    fn test_field_boundaries_are_part_of_the_hash() {
        let ab_c = CanonicalHasher::new().field("AB").field("C").finish();
        let a_bc = CanonicalHasher::new().field("A").field("BC").finish();
        assert_ne!(ab_c, a_bc);
        assert_eq!(ab_c, CanonicalHasher::new().field("AB").field("C").finish());
        assert_eq!(ab_c.len(), 64);
    }

    #[test]
    fn test_serde_transparent() {
        let id = RecordId::from_encoded("abc_-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc_-123\"");
    }
}
