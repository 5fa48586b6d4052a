//! Password-based encryption of strings into self-describing envelopes.
//!
//! A password is stretched with scrypt, the plaintext is sealed with
//! AES-GCM, and salt, nonce, ciphertext and KDF parameters are packed into
//! a small JSON envelope. Derived keys are cached per password so repeated
//! operations skip the expensive derivation.
//!
//! ```
//! use pwseal::Encryptor;
//!
//! # fn main() -> pwseal::Result<()> {
//! let enc = Encryptor::new();
//! let envelope = enc.encrypt_string("Hello World", "123")?;
//! assert!(envelope.starts_with(r#"{"v":"1","t":"scrypt""#));
//! assert_eq!(enc.decrypt_string(&envelope, "123")?, "Hello World");
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod crypto;
mod encryptor;
mod error;
mod format;
mod hash;
mod pool;

use std::sync::LazyLock;

pub use crate::cache::{CacheLimits, CachedKey, KeyCache, SharedKeyCache};
pub use crate::config::EncryptorConfig;
pub use crate::crypto::{Kdf, KdfParams, Scrypt};
pub use crate::encryptor::Encryptor;
pub use crate::error::{CryptoError, Error, Result};
pub use crate::format::{Envelope, parse as parse_envelope, serialize as serialize_envelope};
pub use crate::hash::{create_deterministic_hash, create_sha256_hash};
pub use crate::pool::AsyncEncryptor;

static DEFAULT_ENCRYPTOR: LazyLock<Encryptor> = LazyLock::new(Encryptor::new);

/// Process-wide encryptor used by the free functions.
pub fn default_encryptor() -> &'static Encryptor {
    &DEFAULT_ENCRYPTOR
}

/// [`Encryptor::encrypt_string`] on the process-wide encryptor.
pub fn encrypt_string(plaintext: &str, password: &str) -> Result<String> {
    DEFAULT_ENCRYPTOR.encrypt_string(plaintext, password)
}

/// [`Encryptor::decrypt_string`] on the process-wide encryptor.
pub fn decrypt_string(envelope: &str, password: &str) -> Result<String> {
    DEFAULT_ENCRYPTOR.decrypt_string(envelope, password)
}
