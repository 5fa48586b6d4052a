//! Password-based string encryption.
//!
//! [`Encryptor`] turns a plaintext string and a password into envelope text
//! and back. Derived keys are cached per password digest so repeated calls
//! with the same password skip the KDF; concurrent callers that need the same
//! key wait on a single derivation instead of running their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use crate::cache::{self, CachedKey, KeyCache, SharedKeyCache};
use crate::config::EncryptorConfig;
use crate::crypto::aead::check_key_len;
use crate::crypto::{self, Kdf, KdfParams, Scrypt, generate_nonce, generate_salt};
use crate::error::{CryptoError, Error, Result};
use crate::format::{self, Envelope};
use crate::hash::create_deterministic_hash;

type Flight = Arc<OnceLock<std::result::Result<CachedKey, CryptoError>>>;

/// Identifies one derivation. `salt` is `None` for "any key for this
/// password", which is what encryption asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    password_digest: String,
    salt: Option<Vec<u8>>,
}

pub struct Encryptor<K: Kdf = Scrypt> {
    config: EncryptorConfig,
    cache: SharedKeyCache,
    kdf: K,
    in_flight: Mutex<HashMap<FlightKey, Flight>>,
}

impl Encryptor<Scrypt> {
    /// Default parameters, with a private cache.
    pub fn new() -> Self {
        Self::with_config(EncryptorConfig::default())
    }

    pub fn with_config(config: EncryptorConfig) -> Self {
        let cache = KeyCache::shared(config.cache);
        Self::with_cache(config, cache)
    }

    /// Use an existing cache, e.g. one shared with other encryptors.
    pub fn with_cache(config: EncryptorConfig, cache: SharedKeyCache) -> Self {
        Self::with_kdf(config, cache, Scrypt)
    }
}

impl Default for Encryptor<Scrypt> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kdf> Encryptor<K> {
    pub fn with_kdf(config: EncryptorConfig, cache: SharedKeyCache, kdf: K) -> Self {
        Self {
            config,
            cache,
            kdf,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EncryptorConfig {
        &self.config
    }

    pub fn cache(&self) -> &SharedKeyCache {
        &self.cache
    }

    pub fn kdf(&self) -> &K {
        &self.kdf
    }

    /// Encrypt `plaintext` under `password` and return envelope text.
    ///
    /// The first key derived for a password is reused for later calls until
    /// it is evicted, so envelopes from one session share a salt. The nonce
    /// is fresh on every call.
    pub fn encrypt_string(&self, plaintext: &str, password: &str) -> Result<String> {
        self.seal(plaintext, password).map_err(|e| {
            warn!(error = %e, "encryption failed");
            Error::Encryption(e)
        })
    }

    /// Decrypt envelope text produced by [`encrypt_string`](Self::encrypt_string).
    ///
    /// The key is derived with the parameters recorded in the envelope, not
    /// the configured ones.
    pub fn decrypt_string(&self, envelope: &str, password: &str) -> Result<String> {
        self.open(envelope, password).map_err(|e| {
            warn!(error = %e, "decryption failed");
            Error::Decryption(e)
        })
    }

    fn seal(&self, plaintext: &str, password: &str) -> std::result::Result<String, CryptoError> {
        let digest = create_deterministic_hash(password);
        let entry = self.encryption_key(&digest, password)?;

        let nonce = generate_nonce()?;
        let ciphertext = crypto::seal(entry.key(), &nonce, plaintext.as_bytes())?;

        let envelope = Envelope::new(
            self.kdf.id(),
            *entry.params(),
            entry.salt(),
            &nonce,
            &ciphertext,
        )?;
        format::serialize(&envelope)
    }

    fn open(&self, text: &str, password: &str) -> std::result::Result<String, CryptoError> {
        let envelope = format::parse(text)?;
        if envelope.kdf() != self.kdf.id() {
            return Err(CryptoError::UnsupportedEnvelope {
                version: envelope.version().to_owned(),
                kdf: envelope.kdf().to_owned(),
            });
        }

        let digest = create_deterministic_hash(password);
        let (salt, nonce, ciphertext) = envelope.split();
        let entry = self.decryption_key(&digest, password, salt, envelope.kdf_params())?;

        let plaintext = crypto::open(entry.key(), nonce, ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Any cached key for the password, or a new one under a fresh salt.
    fn encryption_key(
        &self,
        digest: &str,
        password: &str,
    ) -> std::result::Result<CachedKey, CryptoError> {
        let cached = cache::lock(&self.cache).lookup_any(digest);
        if let Some(entry) = cached {
            debug!("key cache hit");
            return Ok(entry);
        }

        let flight = FlightKey {
            password_digest: digest.to_owned(),
            salt: None,
        };
        self.single_flight(flight, || {
            let cached = cache::lock(&self.cache).lookup_any(digest);
            if let Some(entry) = cached {
                return Ok(entry);
            }

            debug!("key cache miss, deriving key under a new salt");
            check_key_len(self.config.kdf.dk_len())?;
            let salt = generate_salt(self.config.salt_len)?;
            let key = self.kdf.derive(password, &salt, &self.config.kdf)?;
            let entry = CachedKey::new(salt, self.config.kdf, key);
            cache::lock(&self.cache).insert(digest, entry.clone());
            Ok(entry)
        })
    }

    /// The key for exactly this salt and these parameters.
    fn decryption_key(
        &self,
        digest: &str,
        password: &str,
        salt: &[u8],
        params: &KdfParams,
    ) -> std::result::Result<CachedKey, CryptoError> {
        // keys the cipher cannot use must never reach the cache
        check_key_len(params.dk_len())?;

        let cached = cache::lock(&self.cache).lookup_by_salt(digest, salt);
        match cached {
            Some(entry) if entry.params() == params => {
                debug!("key cache hit");
                return Ok(entry);
            }
            Some(_) => {
                // same salt under other parameters; the cached key is kept
                debug!("cached key has different parameters, deriving uncached");
                let key = self.kdf.derive(password, salt, params)?;
                return Ok(CachedKey::new(salt.to_vec(), *params, key));
            }
            None => {}
        }

        let flight = FlightKey {
            password_digest: digest.to_owned(),
            salt: Some(salt.to_vec()),
        };
        self.single_flight(flight, || {
            let cached = cache::lock(&self.cache).lookup_by_salt(digest, salt);
            if let Some(entry) = cached.filter(|entry| entry.params() == params) {
                return Ok(entry);
            }

            debug!("key cache miss, deriving key from envelope parameters");
            let key = self.kdf.derive(password, salt, params)?;
            let entry = CachedKey::new(salt.to_vec(), *params, key);
            cache::lock(&self.cache).insert(digest, entry.clone());
            Ok(entry)
        })
    }

    /// Run `derive` once per `key` across concurrent callers. Late arrivals
    /// block until the first caller finishes and share its result.
    fn single_flight<F>(
        &self,
        key: FlightKey,
        derive: F,
    ) -> std::result::Result<CachedKey, CryptoError>
    where
        F: FnOnce() -> std::result::Result<CachedKey, CryptoError>,
    {
        let flight: Flight = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        let result = flight.get_or_init(derive).clone();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &flight))
        {
            in_flight.remove(&key);
        }

        result
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K: Kdf> fmt::Debug for Encryptor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("kdf", &self.kdf.id())
            .field("config", &self.config)
            .field("cache", &*cache::lock(&self.cache))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use zeroize::Zeroizing;

    fn cheap_config() -> EncryptorConfig {
        EncryptorConfig::default().with_kdf(KdfParams::new(1 << 10, 8, 1, 16).unwrap())
    }

    fn cheap() -> Encryptor {
        Encryptor::with_config(cheap_config())
    }

    /// Scrypt, but counts derivations and can be slowed down.
    #[derive(Default)]
    struct CountingKdf {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Kdf for CountingKdf {
        fn id(&self) -> &'static str {
            "scrypt"
        }

        fn derive(
            &self,
            password: &str,
            salt: &[u8],
            params: &KdfParams,
        ) -> std::result::Result<Zeroizing<Vec<u8>>, CryptoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Scrypt.derive(password, salt, params)
        }
    }

    fn counting(delay: Duration) -> Encryptor<CountingKdf> {
        let config = cheap_config();
        let cache = KeyCache::shared(config.cache);
        Encryptor::with_kdf(
            config,
            cache,
            CountingKdf {
                calls: AtomicUsize::new(0),
                delay,
            },
        )
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let enc = cheap();
        let envelope = enc.encrypt_string("Hello World", "123").unwrap();
        assert_eq!(enc.decrypt_string(&envelope, "123").unwrap(), "Hello World");
    }

    #[test]
    fn envelope_carries_configured_params() {
        let enc = cheap();
        let text = enc.encrypt_string("x", "pw").unwrap();
        let envelope = format::parse(&text).unwrap();

        assert_eq!(envelope.kdf_params(), &cheap_config().kdf);
        assert_eq!(envelope.salt_len(), 16);
        assert_eq!(envelope.ciphertext().len(), 1 + crypto::TAG_LEN);
    }

    #[test]
    fn second_encryption_reuses_salt_with_fresh_nonce() {
        let enc = counting(Duration::ZERO);
        let a = format::parse(&enc.encrypt_string("same", "pw").unwrap()).unwrap();
        let b = format::parse(&enc.encrypt_string("same", "pw").unwrap()).unwrap();

        assert_eq!(a.salt(), b.salt());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext(), b.ciphertext());
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decrypt_after_encrypt_hits_cache() {
        let enc = counting(Duration::ZERO);
        let text = enc.encrypt_string("payload", "pw").unwrap();
        enc.decrypt_string(&text, "pw").unwrap();
        enc.decrypt_string(&text, "pw").unwrap();
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_envelope_is_cached_by_salt() {
        let producer = cheap();
        let text = producer.encrypt_string("payload", "pw").unwrap();

        let consumer = counting(Duration::ZERO);
        consumer.decrypt_string(&text, "pw").unwrap();
        consumer.decrypt_string(&text, "pw").unwrap();
        assert_eq!(consumer.kdf().calls.load(Ordering::SeqCst), 1);

        let digest = create_deterministic_hash("pw");
        let salt = format::parse(&text).unwrap().salt().to_vec();
        assert!(cache::lock(consumer.cache()).lookup_by_salt(&digest, &salt).is_some());
    }

    #[test]
    fn decrypt_uses_envelope_params() {
        let old = Encryptor::with_config(
            EncryptorConfig::default().with_kdf(KdfParams::new(1 << 11, 4, 2, 32).unwrap()),
        );
        let text = old.encrypt_string("legacy", "pw").unwrap();

        assert_eq!(cheap().decrypt_string(&text, "pw").unwrap(), "legacy");
    }

    #[test]
    fn reused_key_keeps_its_own_params() {
        // key cached while decrypting an envelope with other parameters
        let old = Encryptor::with_config(
            EncryptorConfig::default().with_kdf(KdfParams::new(1 << 11, 8, 1, 16).unwrap()),
        );
        let legacy = old.encrypt_string("legacy", "pw").unwrap();

        let enc = cheap();
        enc.decrypt_string(&legacy, "pw").unwrap();
        let fresh = enc.encrypt_string("fresh", "pw").unwrap();

        assert_eq!(format::parse(&fresh).unwrap().kdf_params().n(), 1 << 11);
        assert_eq!(cheap().decrypt_string(&fresh, "pw").unwrap(), "fresh");
    }

    #[test]
    fn same_salt_other_params_is_not_served_from_cache() {
        let enc = cheap();
        let text = enc.encrypt_string("data", "pw").unwrap();

        // rewrite params without touching salt; the key no longer matches
        let tampered = text.replace(r#""N":1024"#, r#""N":2048"#);
        let err = enc.decrypt_string(&tampered, "pw").unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn wrong_password_fails_closed() {
        let enc = cheap();
        let text = enc.encrypt_string("secret", "right").unwrap();
        let err = enc.decrypt_string(&text, "wrong").unwrap_err();

        assert!(err.is_decryption());
        assert_eq!(err.reason(), &CryptoError::AuthenticationFailure);
    }

    #[test]
    fn unsupported_kdf_rejected_without_deriving() {
        let enc = counting(Duration::ZERO);
        let text = cheap().encrypt_string("x", "pw").unwrap();
        let other = text.replace(r#""t":"scrypt""#, r#""t":"argon2id""#);

        let err = enc.decrypt_string(&other, "pw").unwrap_err();
        assert!(matches!(err.reason(), CryptoError::UnsupportedEnvelope { .. }));
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_config_params_surface_as_encryption_error() {
        let config: EncryptorConfig =
            serde_json::from_str(r#"{"kdf":{"N":1000,"r":8,"p":1,"dkLen":16}}"#).unwrap();
        let err = Encryptor::with_config(config)
            .encrypt_string("x", "pw")
            .unwrap_err();

        assert!(err.is_encryption());
        assert!(matches!(err.reason(), CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn unsupported_key_length_is_encryption_error() {
        let err = Encryptor::with_config(
            EncryptorConfig::default().with_kdf(KdfParams::new(1 << 10, 8, 1, 24).unwrap()),
        )
        .encrypt_string("x", "pw")
        .unwrap_err();

        assert!(matches!(err.reason(), CryptoError::Cipher(_)));
    }

    #[test]
    fn unusable_config_key_length_derives_nothing() {
        let config =
            EncryptorConfig::default().with_kdf(KdfParams::new(1 << 10, 8, 1, 24).unwrap());
        let cache = KeyCache::shared(config.cache);
        let enc = Encryptor::with_kdf(config, cache, CountingKdf::default());

        assert!(enc.encrypt_string("x", "pw").is_err());
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 0);
        assert!(cache::lock(enc.cache()).is_empty());
    }

    #[test]
    fn unusable_key_length_is_not_cached() {
        let enc = counting(Duration::ZERO);
        let text = enc.encrypt_string("x", "pw").unwrap();
        cache::lock(enc.cache()).clear();

        let odd = text.replace(r#""dkLen":16"#, r#""dkLen":24"#);
        let err = enc.decrypt_string(&odd, "pw").unwrap_err();
        assert!(err.is_decryption());
        assert!(matches!(err.reason(), CryptoError::Cipher(_)));
        assert!(cache::lock(enc.cache()).is_empty());
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 1);

        let fresh = enc.encrypt_string("hello", "pw").unwrap();
        assert_eq!(enc.decrypt_string(&fresh, "pw").unwrap(), "hello");
    }

    #[test]
    fn concurrent_encryptions_share_one_derivation() {
        let enc = Arc::new(counting(Duration::from_millis(50)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let enc = Arc::clone(&enc);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    enc.encrypt_string(&format!("message {i}"), "pw").unwrap()
                })
            })
            .collect();

        let envelopes: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 1);
        assert_eq!(enc.in_flight_len(), 0);
        for (i, text) in envelopes.iter().enumerate() {
            assert_eq!(enc.decrypt_string(text, "pw").unwrap(), format!("message {i}"));
        }
    }

    #[test]
    fn concurrent_decryptions_share_one_derivation() {
        let text = cheap().encrypt_string("shared", "pw").unwrap();
        let enc = Arc::new(counting(Duration::from_millis(50)));
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let enc = Arc::clone(&enc);
                let barrier = Arc::clone(&barrier);
                let text = text.clone();
                thread::spawn(move || {
                    barrier.wait();
                    enc.decrypt_string(&text, "pw").unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "shared");
        }
        assert_eq!(enc.kdf().calls.load(Ordering::SeqCst), 1);
        assert_eq!(enc.in_flight_len(), 0);
    }

    #[test]
    fn encryptors_can_share_a_cache() {
        let config = cheap_config();
        let shared = KeyCache::shared(config.cache);
        let a = Encryptor::with_cache(config.clone(), Arc::clone(&shared));
        let b = Encryptor::with_cache(config, Arc::clone(&shared));

        let text = a.encrypt_string("x", "pw").unwrap();
        assert_eq!(b.decrypt_string(&text, "pw").unwrap(), "x");
        assert_eq!(cache::lock(&shared).len(), 1);
    }

    #[test]
    fn debug_output_has_no_secrets() {
        let enc = cheap();
        enc.encrypt_string("top secret", "hunter2").unwrap();
        let debug = format!("{enc:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("top secret"));
        assert!(debug.contains("scrypt"));
    }
}
