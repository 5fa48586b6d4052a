//! Cryptographic primitives behind the envelope.
//!
//! Provides key derivation, authenticated encryption and OS randomness.

pub mod aead;
pub mod kdf;

pub use aead::{open, seal};
pub use kdf::{Kdf, KdfParams, Scrypt};

use crate::error::CryptoError;
use getrandom::fill;

/// Length of the salt written into new envelopes (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the AES-GCM nonce (12 bytes). Not recorded in the envelope.
pub const NONCE_LEN: usize = 12;
/// Length of the AES-GCM authentication tag (16 bytes).
pub const TAG_LEN: usize = 16;

/// Fill buffer with cryptographically secure random bytes
fn secure_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    fill(buf).map_err(|_| CryptoError::RandomUnavailable)
}

/// Generate a salt of `len` random bytes
pub fn generate_salt(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; len];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Generate a fresh nonce
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;
    Ok(nonce)
}
