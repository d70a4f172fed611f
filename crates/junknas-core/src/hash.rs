//! SHA-256 content addressing helpers.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 digest used as a content address.
pub type Hash = [u8; 32];

/// Hash a byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a byte slice and return the lowercase hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Convert a hash to its lowercase hex form.
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Parse a 64-char hex digest back into a hash.
pub fn from_hex(hex_str: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Check that a string is exactly 64 hex characters.
///
/// Used to validate chunk names coming in over HTTP before they are ever
/// turned into filesystem paths.
pub fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let hash = sha256(b"hello world");
        let hex = to_hex(&hash);
        assert_eq!(hex.len(), 64);
        assert_eq!(from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn test_from_hex_rejects_short() {
        assert!(from_hex("abcd").is_err());
    }

    #[test]
    fn test_is_hex64() {
        let good = "a".repeat(64);
        assert!(is_hex64(&good));
        assert!(!is_hex64(&"a".repeat(63)));
        assert!(!is_hex64(&"g".repeat(64)));
        assert!(!is_hex64(""));
    }
}
