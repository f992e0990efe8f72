//! Content fingerprints for cache keys.
//!
//! A key is `{prefix}:{hex}` where `hex` is the first 16 bytes of a SHA-256
//! digest over every part that influences the result. Each part is
//! length-prefixed, so `["ab", "c"]` and `["a", "bc"]` never collide.

use sha2::{Digest, Sha256};

/// Digest bytes kept in the key (32 hex characters).
pub const FINGERPRINT_BYTES: usize = 16;

/// Build a cache key from a prefix and content parts.
///
/// Pure: identical inputs always produce the identical key. Empty parts are
/// valid and still contribute to the digest.
pub fn fingerprint(prefix: &str, parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    format!("{prefix}:{}", hex::encode(&digest[..FINGERPRINT_BYTES]))
}
