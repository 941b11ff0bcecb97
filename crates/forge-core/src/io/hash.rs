//! Content hashing for conflict detection

use blake3;
use sha2::{Digest, Sha256};

/// Compute BLAKE3 hash of content for conflict detection
///
/// Uses BLAKE3 (fast, cryptographically secure hash function).
/// Returns a hex-encoded string for easy comparison and logging.
pub fn compute_hash(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hash.to_hex().to_string()
}

/// Compute a hex-encoded SHA-256 digest of `content`.
///
/// Used specifically where a digest must be reproducible by a
/// reimplementation in another language (`spec.md` §6 "Schema is
/// fingerprinted ... for cross-implementation parity checks") — BLAKE3 has
/// no such cross-language expectation, SHA-256 does.
pub fn compute_sha256(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
