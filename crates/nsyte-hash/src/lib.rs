//! Content hashing for blob identity.
//!
//! Every blob is addressed by the lowercase hex of its SHA-256 digest.
//! This crate is the single place that computation happens so the hash
//! format (lowercase, no prefix) stays consistent across the scanner,
//! reconciler and blob client.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Incremental hasher for streamed content, e.g. large files read in
/// chunks rather than loaded whole into memory.
#[derive(Default)]
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Checks whether `candidate` is a syntactically valid hash: 64
/// lowercase hex characters.
pub fn is_valid_hash(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
