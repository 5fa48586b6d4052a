use aes_gcm::{
    Aes128Gcm, Aes256Gcm,
    aead::{Aead, KeyInit, Nonce, consts::U12},
};

use super::NONCE_LEN;
use crate::error::CryptoError;

/// Encrypt plaintext with AES-GCM; the variant follows the key length
/// (16 bytes: AES-128, 32 bytes: AES-256). Returns `ciphertext || tag`.
pub fn seal(key: &[u8], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match key.len() {
        16 => seal_with::<Aes128Gcm>(key, nonce, plaintext),
        32 => seal_with::<Aes256Gcm>(key, nonce, plaintext),
        n => Err(unsupported_key_len(n)),
    }
}

/// Decrypt and authenticate `ciphertext || tag`.
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::Cipher(format!(
            "invalid nonce size: expected {NONCE_LEN}, got {}",
            nonce.len()
        )));
    }
    match key.len() {
        16 => open_with::<Aes128Gcm>(key, nonce, ciphertext),
        32 => open_with::<Aes256Gcm>(key, nonce, ciphertext),
        n => Err(unsupported_key_len(n)),
    }
}

/// Fails unless a key of `len` bytes selects an AES-GCM variant.
pub fn check_key_len(len: usize) -> Result<(), CryptoError> {
    match len {
        16 | 32 => Ok(()),
        n => Err(unsupported_key_len(n)),
    }
}

fn seal_with<C>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: KeyInit + Aead<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key)
        .map_err(|e| CryptoError::Cipher(format!("failed to create cipher: {e}")))?;

    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Cipher("encryption failed".into()))
}

fn open_with<C>(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: KeyInit + Aead<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key)
        .map_err(|e| CryptoError::Cipher(format!("failed to create cipher: {e}")))?;

    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

fn unsupported_key_len(len: usize) -> CryptoError {
    CryptoError::Cipher(format!(
        "unsupported AES-GCM key length: {len} bytes (expected 16 or 32)"
    ))
}
