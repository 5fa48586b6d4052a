use std::time::Duration;

use thiserror::Error;

/// Failure inside one of the crate's components.
///
/// These never cross the public boundary on their own; [`Error`] wraps them
/// so callers only need to tell an encryption failure from a decryption one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("unsupported envelope (version {version:?}, kdf {kdf:?})")]
    UnsupportedEnvelope { version: String, kdf: String },

    #[error("malformed envelope: {0}")]
    EnvelopeParse(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid password or corrupted data")]
    AuthenticationFailure,

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("OS random generator unavailable")]
    RandomUnavailable,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,

    #[error("key derivation did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

/// Error returned by every public encrypt/decrypt operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    #[error("decryption failed: {0}")]
    Decryption(#[source] CryptoError),
}

impl Error {
    /// The underlying component failure.
    pub fn reason(&self) -> &CryptoError {
        match self {
            Error::Encryption(reason) | Error::Decryption(reason) => reason,
        }
    }

    pub fn is_encryption(&self) -> bool {
        matches!(self, Error::Encryption(_))
    }

    pub fn is_decryption(&self) -> bool {
        matches!(self, Error::Decryption(_))
    }

    /// `true` when the cipher rejected the ciphertext: wrong password,
    /// tampered payload or mismatched parameters.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.reason(), CryptoError::AuthenticationFailure)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
