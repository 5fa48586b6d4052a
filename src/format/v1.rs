//! Envelope format v1 (`"v":"1"`, `"t":"scrypt"`).
//!
//! ```text
//! d = base64( SALT (saltLen) | NONCE (12) | CIPHERTEXT | TAG (16) )
//! o = scrypt parameters used to derive the key
//! ```

use std::borrow::Cow;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::Envelope;
use crate::crypto::{KdfParams, kdf::SCRYPT_ID};
use crate::error::CryptoError;

pub const VERSION_V1: &str = "1";

/// Field order here is the order on the wire.
#[derive(Serialize, Deserialize)]
struct Wire<'a> {
    v: Cow<'a, str>,
    t: Cow<'a, str>,
    d: String,
    o: KdfParams,
    #[serde(rename = "saltLen")]
    salt_len: usize,
}

/// Parses a v1 envelope.
///
/// # Errors
///
/// Returns [`CryptoError::EnvelopeParse`] on missing or ill-typed fields,
/// invalid base64, or a payload too short for `saltLen`.
pub fn parse(text: &str) -> Result<Envelope, CryptoError> {
    let wire: Wire<'_> = serde_json::from_str(text)
        .map_err(|e| CryptoError::EnvelopeParse(format!("invalid v1 envelope: {e}")))?;

    if wire.v != VERSION_V1 || wire.t != SCRYPT_ID {
        return Err(CryptoError::UnsupportedEnvelope {
            version: wire.v.into_owned(),
            kdf: wire.t.into_owned(),
        });
    }

    let payload = STANDARD
        .decode(&wire.d)
        .map_err(|e| CryptoError::EnvelopeParse(format!("invalid payload encoding: {e}")))?;

    Envelope::from_parts(VERSION_V1, SCRYPT_ID, wire.o, wire.salt_len, payload)
}

/// Serializes an envelope to v1 text.
pub fn serialize(envelope: &Envelope) -> Result<String, CryptoError> {
    if envelope.version() != VERSION_V1 {
        return Err(CryptoError::EnvelopeParse(
            "wrong version for v1 serializer".into(),
        ));
    }

    let wire = Wire {
        v: Cow::Borrowed(VERSION_V1),
        t: Cow::Borrowed(SCRYPT_ID),
        d: STANDARD.encode(envelope.payload()),
        o: *envelope.kdf_params(),
        salt_len: envelope.salt_len(),
    };

    serde_json::to_string(&wire)
        .map_err(|e| CryptoError::EnvelopeParse(format!("failed to serialize envelope: {e}")))
}
