//! Encryptor configuration.
//!
//! Defaults reproduce the envelope defaults (`N = 2^17`, `r = 8`, `p = 1`,
//! `dkLen = 16`, 16-byte salt) and the 3 × 10 key cache bounds. Hosts that
//! need other values build an [`EncryptorConfig`] in code or parse one from
//! JSON; nothing is read from the environment.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::cache::CacheLimits;
use crate::crypto::aead::check_key_len;
use crate::crypto::{KdfParams, SALT_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptorConfig {
    /// KDF parameters for new envelopes. Decryption always uses the
    /// envelope's own parameters.
    pub kdf: KdfParams,
    pub salt_len: usize,
    pub cache: CacheLimits,
    /// Concurrent derivations allowed by the async adapter.
    pub workers: usize,
    /// Deadline for one async operation, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf_timeout_ms: Option<u64>,
}

impl Default for EncryptorConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            salt_len: SALT_LEN,
            cache: CacheLimits::default(),
            workers: default_workers(),
            kdf_timeout_ms: None,
        }
    }
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl EncryptorConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).context("failed to parse encryptor config")?;
        config.validate().context("invalid encryptor config")?;
        Ok(config)
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_cache_limits(mut self, cache: CacheLimits) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_kdf_timeout(mut self, timeout: Duration) -> Self {
        self.kdf_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn kdf_timeout(&self) -> Option<Duration> {
        self.kdf_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        check_key_len(self.kdf.dk_len())?;
        if self.salt_len == 0 {
            bail!("salt length must be >= 1");
        }
        if self.cache.max_passwords == 0 {
            bail!("cache must hold at least one password");
        }
        if self.cache.max_salts_per_password == 0 {
            bail!("cache must hold at least one salt per password");
        }
        if self.workers == 0 {
            bail!("at least one KDF worker is required");
        }
        Ok(())
    }
}
