use async_lock::Mutex as AsyncMutex;
use async_trait::async_trait;
use lru::LruCache;
use std::time::{Duration, Instant};
use tracing::debug;
use zeroize::ZeroizeOnDrop;

use crate::errors::KeyDecryptionError;
use crate::key_store::{ColumnEncryptionKey, ColumnKeyStoreProvider};

#[derive(ZeroizeOnDrop)]
struct CachedKeyEntry {
    key: ColumnEncryptionKey,
    #[zeroize(skip)]
    created_at: Instant,
}

#[derive(Hash, PartialEq, Eq)]
struct CacheKey {
    master_key_path: String,
    encrypted_key: Vec<u8>,
}

/// The options for configuring a [`CachingKeyStoreProvider`]'s cache
pub struct CacheOptions {
    max_age: Duration,
    max_entries: usize,
}

impl CacheOptions {
    /// Configure the maximum time an unwrapped key can remain in the cache
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Configure the maximum number of keys that can be in the cache
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        // Two hours matches the column encryption key cache of the .NET SqlClient driver
        Self {
            max_age: Duration::from_secs(2 * 60 * 60),
            max_entries: 100,
        }
    }
}

/// A wrapper for a [`ColumnKeyStoreProvider`] that remembers unwrapped keys, so a
/// remote key store is only asked once per key for as long as `max_age` allows.
pub struct CachingKeyStoreProvider<K> {
    cache: AsyncMutex<LruCache<CacheKey, CachedKeyEntry>>,
    options: CacheOptions,
    provider: K,
}

impl<K> CachingKeyStoreProvider<K> {
    /// Create a new CachingKeyStoreProvider from a key store provider and caching options
    pub fn new(provider: K, options: CacheOptions) -> Self {
        Self {
            provider,
            cache: AsyncMutex::new(LruCache::new(options.max_entries)),
            options,
        }
    }

    fn maybe_prune_last_entry(&self, cache: &mut LruCache<CacheKey, CachedKeyEntry>) {
        let should_pop = cache
            .peek_lru()
            .map(|(_, entry)| entry.created_at.elapsed() > self.options.max_age)
            .unwrap_or(false);

        if should_pop {
            drop(cache.pop_lru());
        }
    }

    async fn get_cached_key(&self, lookup: &CacheKey) -> Option<ColumnEncryptionKey> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(lookup) {
            if cached.created_at.elapsed() <= self.options.max_age {
                return Some(cached.key.clone());
            }
        }

        self.maybe_prune_last_entry(&mut cache);

        None
    }

    async fn cache_key(&self, lookup: CacheKey, key: ColumnEncryptionKey) {
        let mut cache = self.cache.lock().await;

        self.maybe_prune_last_entry(&mut cache);

        cache.put(
            lookup,
            CachedKeyEntry {
                key,
                created_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl<K> ColumnKeyStoreProvider for CachingKeyStoreProvider<K>
where
    K: ColumnKeyStoreProvider,
{
    async fn decrypt_column_encryption_key(
        &self,
        master_key_path: &str,
        algorithm: &str,
        encrypted_key: &[u8],
    ) -> Result<ColumnEncryptionKey, KeyDecryptionError> {
        let lookup = CacheKey {
            master_key_path: master_key_path.to_string(),
            encrypted_key: encrypted_key.to_vec(),
        };

        if let Some(cached) = self.get_cached_key(&lookup).await {
            debug!(master_key_path, "column encryption key served from cache");
            return Ok(cached);
        }

        let key = self
            .provider
            .decrypt_column_encryption_key(master_key_path, algorithm, encrypted_key)
            .await?;

        self.cache_key(lookup, key.clone()).await;

        Ok(key)
    }
}
