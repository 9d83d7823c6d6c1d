//! Content fingerprints used to detect document changes.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}
