//! Content-addressable hashing for uploaded files.
//!
//! Documents carry a hex SHA-256 digest of their file bytes so integrity can
//! be verified later. Hashing failure is non-fatal: a sentinel marker is
//! stored in place of the digest and consumers must treat it as
//! "unverifiable", never as "verified corrupt".

use sha2::{Digest, Sha256};

/// Sentinel stored when a digest could not be computed. Contains characters
/// outside the hex alphabet so it can never collide with a real digest.
pub const HASH_UNAVAILABLE: &str = "hash-unavailable";

/// Length in hex characters of a SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a file's bytes, substituting [`HASH_UNAVAILABLE`] if the bytes could
/// not be read. The pipeline continues either way; the document is simply
/// flagged as having an unverified hash.
pub fn hash_file_bytes(bytes: Result<&[u8], std::io::Error>) -> String {
    match bytes {
        Ok(b) => sha256_hex(b),
        Err(err) => {
            tracing::warn!("hash computation failed: {}", err);
            HASH_UNAVAILABLE.to_string()
        }
    }
}

/// Whether `value` is a plausible hex SHA-256 digest. The sentinel always
/// fails this check.
pub fn is_valid_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = sha256_hex(b"decreto 001/2024");
        let b = sha256_hex(b"decreto 001/2024");
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn different_bytes_differ() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn sentinel_is_never_a_valid_digest() {
        assert!(!is_valid_digest(HASH_UNAVAILABLE));
        assert!(is_valid_digest(&sha256_hex(b"anything")));
    }

    #[test]
    fn read_failure_yields_sentinel() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(hash_file_bytes(Err(err)), HASH_UNAVAILABLE);
        assert_eq!(hash_file_bytes(Ok(b"bytes")), sha256_hex(b"bytes"));
    }
}
