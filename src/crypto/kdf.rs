use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Identifier written into the `t` field of envelopes derived with scrypt.
pub const SCRYPT_ID: &str = "scrypt";

/// Longest key the KDF will be asked to produce.
pub const MAX_DK_LEN: usize = 64;

/// Upper bound on scrypt scratch memory, `128 * r * (N + p)` bytes (2 GiB).
/// Larger requests are refused before anything is allocated.
pub const MAX_KDF_MEMORY: u64 = 2 << 30;

/// scrypt cost parameters, serialized with their envelope names
/// (`N`, `r`, `p`, `dkLen`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(rename = "N")]
    n: u64,
    r: u32,
    p: u32,
    #[serde(rename = "dkLen")]
    dk_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // CPU/memory cost, 2^17
            n: 1 << 17,
            // block size
            r: 8,
            // parallelization
            p: 1,
            // AES-128 key
            dk_len: 16,
        }
    }
}

impl KdfParams {
    pub fn new(n: u64, r: u32, p: u32, dk_len: usize) -> Result<Self, CryptoError> {
        let params = Self { n, r, p, dk_len };
        params.validate()?;
        Ok(params)
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    pub fn dk_len(&self) -> usize {
        self.dk_len
    }

    /// log2(N); only meaningful once [`validate`](Self::validate) passed.
    pub fn log_n(&self) -> u8 {
        self.n.trailing_zeros() as u8
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.n < 2 || !self.n.is_power_of_two() {
            return Err(CryptoError::KeyDerivation(format!(
                "scrypt N must be a power of two greater than 1, got {}",
                self.n
            )));
        }
        if self.r < 1 {
            return Err(CryptoError::KeyDerivation("scrypt r must be >= 1".into()));
        }
        if self.p < 1 {
            return Err(CryptoError::KeyDerivation("scrypt p must be >= 1".into()));
        }
        let memory = self
            .n
            .checked_add(u64::from(self.p))
            .and_then(|blocks| blocks.checked_mul(128 * u64::from(self.r)));
        match memory {
            Some(bytes) if bytes <= MAX_KDF_MEMORY => {}
            _ => {
                return Err(CryptoError::KeyDerivation(format!(
                    "scrypt parameters N={}, r={}, p={} need more than {MAX_KDF_MEMORY} bytes",
                    self.n, self.r, self.p
                )));
            }
        }
        if self.dk_len < 1 || self.dk_len > MAX_DK_LEN {
            return Err(CryptoError::KeyDerivation(format!(
                "derived key length must be between 1 and {MAX_DK_LEN} bytes, got {}",
                self.dk_len
            )));
        }
        Ok(())
    }
}

/// A password-based key-derivation function.
///
/// Derivation is blocking and expensive. Hosts that serve concurrent callers
/// run it off the async executor (see [`crate::pool`]).
pub trait Kdf: Send + Sync {
    /// Identifier stored in the envelope's `t` field.
    fn id(&self) -> &'static str;

    fn derive(
        &self,
        password: &str,
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// scrypt (RFC 7914).
#[derive(Debug, Clone, Copy, Default)]
pub struct Scrypt;

impl Kdf for Scrypt {
    fn id(&self) -> &'static str {
        SCRYPT_ID
    }

    fn derive(
        &self,
        password: &str,
        salt: &[u8],
        params: &KdfParams,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        derive_key(password, salt, params)
    }
}

/// Derive `params.dk_len()` key bytes from `password` and `salt` with scrypt.
pub fn derive_key(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    params.validate()?;

    // `len` only matters for PHC strings; the output buffer sets the real length
    let scrypt_params = scrypt::Params::new(
        params.log_n(),
        params.r,
        params.p,
        scrypt::Params::RECOMMENDED_LEN,
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid scrypt parameters: {e}")))?;

    debug!(
        n = params.n,
        r = params.r,
        p = params.p,
        dk_len = params.dk_len,
        "deriving key"
    );
    let started = Instant::now();

    let mut key = Zeroizing::new(vec![0u8; params.dk_len]);
    scrypt::scrypt(password.as_bytes(), salt, &scrypt_params, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(format!("scrypt failed: {e}")))?;

    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "key derived");
    Ok(key)
}
