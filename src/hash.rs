//! Deterministic hashing.
//!
//! Used to turn a password into a cache bucket key so the key cache never
//! holds the password itself. Also usable as a general-purpose digest.

use sha2::{Digest, Sha256};

/// SHA-256 of the UTF-8 bytes of `input`, as 64 lowercase hex characters.
pub fn create_deterministic_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Alias of [`create_deterministic_hash`].
pub fn create_sha256_hash(input: &str) -> String {
    create_deterministic_hash(input)
}
