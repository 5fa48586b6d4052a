//! Envelope text format.
//!
//! An envelope is a small JSON object carrying everything needed to decrypt
//! except the password:
//!
//! ```text
//! {"v":"1","t":"scrypt","d":"<base64>","o":{"N":..,"r":..,"p":..,"dkLen":..},"saltLen":..}
//! ```
//!
//! `v` and `t` select the decoder; unknown combinations are rejected before
//! anything else is looked at.

use serde::Deserialize;
use serde_json::Value;

use crate::crypto::{KdfParams, NONCE_LEN, TAG_LEN, kdf::SCRYPT_ID};
use crate::error::CryptoError;

pub mod v1;

/// Latest envelope version
pub const CURRENT_VERSION: &str = v1::VERSION_V1;

/// A decoded envelope.
///
/// The payload is always `salt || nonce || ciphertext || tag`; construction
/// guarantees it is long enough to split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    version: &'static str,
    kdf: &'static str,
    kdf_params: KdfParams,
    salt_len: usize,
    payload: Vec<u8>,
}

impl Envelope {
    /// Assemble a current-version envelope for keys derived by `kdf`.
    pub fn new(
        kdf: &'static str,
        kdf_params: KdfParams,
        salt: &[u8],
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<Self, CryptoError> {
        let mut payload = Vec::with_capacity(salt.len() + NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(salt);
        payload.extend_from_slice(nonce);
        payload.extend_from_slice(ciphertext);

        Self::from_parts(CURRENT_VERSION, kdf, kdf_params, salt.len(), payload)
    }

    pub(crate) fn from_parts(
        version: &'static str,
        kdf: &'static str,
        kdf_params: KdfParams,
        salt_len: usize,
        payload: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let min_len = salt_len.checked_add(NONCE_LEN + TAG_LEN).ok_or_else(|| {
            CryptoError::EnvelopeParse(format!("salt length out of range: {salt_len}"))
        })?;
        if payload.len() < min_len {
            return Err(CryptoError::EnvelopeParse(format!(
                "payload too short: {} bytes, need at least {min_len}",
                payload.len()
            )));
        }
        Ok(Self {
            version,
            kdf,
            kdf_params,
            salt_len,
            payload,
        })
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    /// KDF identifier (`t`).
    pub fn kdf(&self) -> &'static str {
        self.kdf
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf_params
    }

    pub fn salt_len(&self) -> usize {
        self.salt_len
    }

    /// Raw `salt || nonce || ciphertext || tag`.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn salt(&self) -> &[u8] {
        &self.payload[..self.salt_len]
    }

    pub fn nonce(&self) -> &[u8] {
        &self.payload[self.salt_len..self.salt_len + NONCE_LEN]
    }

    /// Ciphertext with the trailing authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.payload[self.salt_len + NONCE_LEN..]
    }

    /// `(salt, nonce, ciphertext || tag)`.
    pub fn split(&self) -> (&[u8], &[u8], &[u8]) {
        (self.salt(), self.nonce(), self.ciphertext())
    }
}

#[derive(Deserialize)]
struct Selector {
    v: Option<Value>,
    t: Option<Value>,
}

/// Parses envelope text, dispatching on `v` and `t`.
///
/// # Errors
///
/// - [`CryptoError::EnvelopeParse`] if the text is not a JSON object, lacks
///   `v`/`t`, or the selected decoder rejects it.
/// - [`CryptoError::UnsupportedEnvelope`] for an unknown `v`/`t` combination.
pub fn parse(text: &str) -> Result<Envelope, CryptoError> {
    let selector: Selector = serde_json::from_str(text)
        .map_err(|e| CryptoError::EnvelopeParse(format!("not an envelope object: {e}")))?;

    let version = selector
        .v
        .ok_or_else(|| CryptoError::EnvelopeParse("missing field `v`".into()))?;
    let kdf = selector
        .t
        .ok_or_else(|| CryptoError::EnvelopeParse("missing field `t`".into()))?;

    match (version.as_str(), kdf.as_str()) {
        (Some(v1::VERSION_V1), Some(SCRYPT_ID)) => v1::parse(text),
        _ => Err(CryptoError::UnsupportedEnvelope {
            version: field_text(&version),
            kdf: field_text(&kdf),
        }),
    }
}

/// Serializes an envelope to its text form.
pub fn serialize(envelope: &Envelope) -> Result<String, CryptoError> {
    match (envelope.version(), envelope.kdf()) {
        (v1::VERSION_V1, SCRYPT_ID) => v1::serialize(envelope),
        (version, kdf) => Err(CryptoError::UnsupportedEnvelope {
            version: version.to_owned(),
            kdf: kdf.to_owned(),
        }),
    }
}

fn field_text(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_owned(),
        None => value.to_string(),
    }
}
