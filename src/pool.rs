//! Async adapter for hosts serving concurrent callers.
//!
//! The KDF is blocking and memory-hard, so each operation runs on tokio's
//! blocking pool under a semaphore with one permit per configured worker.
//! An optional deadline bounds how long a caller waits; a derivation that
//! is already running keeps its permit until it finishes and still fills
//! the cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task;
use tokio::time;
use zeroize::Zeroizing;

use crate::config::EncryptorConfig;
use crate::crypto::{Kdf, Scrypt};
use crate::encryptor::Encryptor;
use crate::error::{CryptoError, Error, Result};

pub struct AsyncEncryptor<K: Kdf + 'static = Scrypt> {
    inner: Arc<Encryptor<K>>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl AsyncEncryptor<Scrypt> {
    pub fn new(config: EncryptorConfig) -> Self {
        Self::from_encryptor(Arc::new(Encryptor::with_config(config)))
    }
}

impl<K: Kdf + 'static> AsyncEncryptor<K> {
    /// Wrap an existing encryptor; worker count and deadline come from its
    /// config.
    pub fn from_encryptor(inner: Arc<Encryptor<K>>) -> Self {
        let workers = inner.config().workers.max(1);
        let timeout = inner.config().kdf_timeout();
        Self {
            inner,
            permits: Arc::new(Semaphore::new(workers)),
            timeout,
        }
    }

    /// Override the configured deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn encryptor(&self) -> &Arc<Encryptor<K>> {
        &self.inner
    }

    pub async fn encrypt_string(&self, plaintext: &str, password: &str) -> Result<String> {
        let plaintext = Zeroizing::new(plaintext.to_owned());
        let password = Zeroizing::new(password.to_owned());
        self.run(Error::Encryption, move |enc| {
            enc.encrypt_string(&plaintext, &password)
        })
        .await
    }

    pub async fn decrypt_string(&self, envelope: &str, password: &str) -> Result<String> {
        let envelope = envelope.to_owned();
        let password = Zeroizing::new(password.to_owned());
        self.run(Error::Decryption, move |enc| {
            enc.decrypt_string(&envelope, &password)
        })
        .await
    }

    async fn run<F>(&self, wrap: fn(CryptoError) -> Error, op: F) -> Result<String>
    where
        F: FnOnce(&Encryptor<K>) -> Result<String> + Send + 'static,
    {
        let work = async {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| wrap(CryptoError::WorkerPool(e.to_string())))?;

            let inner = Arc::clone(&self.inner);
            let joined = task::spawn_blocking(move || {
                let _permit = permit;
                op(inner.as_ref())
            })
            .await;

            match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(wrap(CryptoError::WorkerPool(
                    "worker panicked".into(),
                ))),
                Err(e) => Err(wrap(CryptoError::WorkerPool(e.to_string()))),
            }
        };

        match self.timeout {
            Some(limit) => time::timeout(limit, work)
                .await
                .map_err(|_| wrap(CryptoError::DeadlineExceeded(limit)))?,
            None => work.await,
        }
    }
}

impl<K: Kdf + 'static> Clone for AsyncEncryptor<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            permits: Arc::clone(&self.permits),
            timeout: self.timeout,
        }
    }
}
