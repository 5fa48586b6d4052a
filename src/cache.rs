//! In-memory cache of derived keys.
//!
//! Keys are grouped into buckets by password digest and, within a bucket,
//! by base64 of the salt. Eviction is deliberately coarse: overflowing the
//! table clears the whole table, overflowing a bucket clears the whole bucket.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::KdfParams;

/// Default number of password buckets kept before the table is flushed.
pub const MAX_PASSWORDS: usize = 3;
/// Default number of salts kept per password before the bucket is flushed.
pub const MAX_SALTS_PER_PASSWORD: usize = 10;

/// A cache shared between encryptors.
pub type SharedKeyCache = Arc<Mutex<KeyCache>>;

/// Bounds applied on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    pub max_passwords: usize,
    pub max_salts_per_password: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_passwords: MAX_PASSWORDS,
            max_salts_per_password: MAX_SALTS_PER_PASSWORD,
        }
    }
}

/// A salt, the parameters it was derived with, and the derived key.
/// Immutable once created.
#[derive(Clone)]
pub struct CachedKey {
    salt: Vec<u8>,
    params: KdfParams,
    key: Zeroizing<Vec<u8>>,
}

impl CachedKey {
    pub fn new(salt: Vec<u8>, params: KdfParams, key: Zeroizing<Vec<u8>>) -> Self {
        Self { salt, params, key }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedKey")
            .field("salt_len", &self.salt.len())
            .field("params", &self.params)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Entries of one password, in insertion order.
#[derive(Default)]
struct Bucket {
    entries: Vec<(String, CachedKey)>,
}

impl Bucket {
    fn get(&self, salt_id: &str) -> Option<&CachedKey> {
        self.entries
            .iter()
            .find(|(id, _)| id == salt_id)
            .map(|(_, entry)| entry)
    }
}

#[derive(Default)]
pub struct KeyCache {
    buckets: HashMap<String, Bucket>,
    limits: CacheLimits,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: CacheLimits) -> Self {
        Self {
            buckets: HashMap::new(),
            limits,
        }
    }

    /// Wrap a new cache for sharing between encryptors.
    pub fn shared(limits: CacheLimits) -> SharedKeyCache {
        Arc::new(Mutex::new(Self::with_limits(limits)))
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Exact match on `salt` within the bucket of `password_digest`.
    pub fn lookup_by_salt(&self, password_digest: &str, salt: &[u8]) -> Option<CachedKey> {
        self.buckets
            .get(password_digest)?
            .get(&salt_id(salt))
            .cloned()
    }

    /// The first entry cached for `password_digest`, if any.
    pub fn lookup_any(&self, password_digest: &str) -> Option<CachedKey> {
        self.buckets
            .get(password_digest)?
            .entries
            .first()
            .map(|(_, entry)| entry.clone())
    }

    /// Cache `entry` under `password_digest` and its salt, evicting first.
    ///
    /// Adding a new password bucket to a full table clears the table; adding a
    /// new salt to a full bucket clears that bucket. Re-inserting a known salt
    /// keeps the existing entry.
    pub fn insert(&mut self, password_digest: &str, entry: CachedKey) {
        if !self.buckets.contains_key(password_digest)
            && self.buckets.len() >= self.limits.max_passwords
        {
            info!(buckets = self.buckets.len(), "key cache full, clearing all buckets");
            self.buckets.clear();
        }

        let max_salts = self.limits.max_salts_per_password;
        let bucket = self.buckets.entry(password_digest.to_owned()).or_default();
        let id = salt_id(&entry.salt);

        if bucket.get(&id).is_some() {
            return;
        }

        if bucket.entries.len() >= max_salts {
            info!(entries = bucket.entries.len(), "key cache bucket full, clearing it");
            bucket.entries.clear();
        }

        bucket.entries.push((id, entry));
    }

    /// Number of password buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of cached salts for `password_digest`.
    pub fn bucket_len(&self, password_digest: &str) -> usize {
        self.buckets
            .get(password_digest)
            .map_or(0, |bucket| bucket.entries.len())
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("buckets", &self.buckets.len())
            .field("limits", &self.limits)
            .finish()
    }
}

/// Lock a shared cache. Every operation leaves the table consistent, so a
/// poisoned lock is still safe to use.
pub(crate) fn lock(cache: &SharedKeyCache) -> MutexGuard<'_, KeyCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

fn salt_id(salt: &[u8]) -> String {
    STANDARD.encode(salt)
}
