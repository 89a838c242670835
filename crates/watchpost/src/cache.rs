//! TTL cache over a storage back-end.
//!
//! The cache adds policy to the raw [`Storage`] contract: entries are
//! stamped when stored, live entries are served as-is, and an expired entry
//! is served exactly once more (the "grace read") before being deleted.
//! The grace read is atomic under concurrent callers: a per-key shard mutex
//! guarantees exactly one of them observes the expired value.
//!
//! Storage failures are logged and degrade to a miss; the cache never fails
//! a check.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::warn;

use crate::storage::Storage;

const SHARD_COUNT: usize = 64;

/// A decoded cache hit.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub added_at: SystemTime,
    pub ttl: Duration,
    /// Whether this hit was already past its TTL (a grace read or an
    /// `allow_expired` read).
    pub expired: bool,
}

/// Cheaply cloneable handle; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    storage: Arc<dyn Storage>,
    shards: Vec<Mutex<()>>,
}

impl Cache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                storage,
                shards: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
            }),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    fn shard(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.inner.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Look up `key`.
    ///
    /// With `allow_expired = false` an expired entry is returned once and
    /// deleted; subsequent calls observe a miss. With `allow_expired =
    /// true` expired entries are returned and left in place.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Option<CacheEntry<T>> {
        let _guard = self.shard(key).lock().await;

        let stored = match self.inner.storage.get(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let value: T = match serde_json::from_slice(&stored.value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Undecodable cache entry, evicting");
                self.delete_logged(key).await;
                return None;
            }
        };

        let expired = stored.expired_at(SystemTime::now());
        if expired && !allow_expired {
            // Grace read: hand the value out one last time, then drop it.
            self.delete_logged(key).await;
        }

        Some(CacheEntry {
            value,
            added_at: stored.added_at,
            ttl: stored.ttl,
            expired,
        })
    }

    /// Store `value` under `key`, stamped with the current time.
    pub async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache value");
                return;
            }
        };
        if let Err(e) = self
            .inner
            .storage
            .store(key, &bytes, SystemTime::now(), ttl)
            .await
        {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        self.delete_logged(key).await;
    }

    async fn delete_logged(&self, key: &str) {
        if let Err(e) = self.inner.storage.delete(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }

    /// Wrap a compute function with cache-backed memoization.
    ///
    /// The key is the template with `{}` replaced by the call argument's
    /// `Display` form. Within one TTL window the compute function runs
    /// exactly once per distinct key.
    pub fn memoize<F>(
        &self,
        key_template: impl Into<String>,
        ttl: Duration,
        return_expired: bool,
        compute: F,
    ) -> Memoized<F> {
        Memoized {
            cache: self.clone(),
            key_template: key_template.into(),
            ttl,
            return_expired,
            compute,
        }
    }
}

/// A function wrapped by [`Cache::memoize`].
pub struct Memoized<F> {
    cache: Cache,
    key_template: String,
    ttl: Duration,
    return_expired: bool,
    compute: F,
}

impl<F> Memoized<F> {
    pub async fn call<A, T, E, Fut>(&self, arg: &A) -> Result<T, E>
    where
        A: fmt::Display,
        T: Serialize + DeserializeOwned,
        F: Fn(&A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key_template.replace("{}", &arg.to_string());

        if let Some(entry) = self.cache.get::<T>(&key, self.return_expired).await {
            if !entry.expired || self.return_expired {
                return Ok(entry.value);
            }
            // Expired and return_expired is off: fall through and recompute.
        }

        let value = (self.compute)(arg).await?;
        self.cache.store(&key, &value, self.ttl).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_over_memory() -> (Arc<MemoryStorage>, Cache) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = Cache::new(storage.clone());
        (storage, cache)
    }

    async fn seed_expired(storage: &MemoryStorage, key: &str, value: &str) {
        // Plant an already-expired entry by back-dating added_at.
        let bytes = serde_json::to_vec(value).unwrap();
        storage
            .store(
                key,
                &bytes,
                SystemTime::now() - Duration::from_secs(120),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn store_then_get_returns_the_value() {
        let (_, cache) = cache_over_memory();
        cache.store("k", &"hello".to_string(), Duration::from_secs(60)).await;

        let entry = cache.get::<String>("k", false).await.unwrap();
        assert_eq!(entry.value, "hello");
        assert!(!entry.expired);
    }

    #[tokio::test]
    async fn expired_entry_is_returned_exactly_once() {
        let (storage, cache) = cache_over_memory();
        seed_expired(&storage, "k", "stale").await;

        let first = cache.get::<String>("k", false).await;
        assert!(first.is_some());
        assert!(first.unwrap().expired);

        // The grace read deleted it.
        assert!(cache.get::<String>("k", false).await.is_none());
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn allow_expired_leaves_the_entry_in_place() {
        let (storage, cache) = cache_over_memory();
        seed_expired(&storage, "k", "stale").await;

        let first = cache.get::<String>("k", true).await.unwrap();
        assert!(first.expired);
        let second = cache.get::<String>("k", true).await.unwrap();
        assert_eq!(second.value, "stale");
    }

    #[tokio::test]
    async fn concurrent_grace_reads_yield_exactly_one_value() {
        let (storage, cache) = cache_over_memory();
        seed_expired(&storage, "k", "stale").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get::<String>("k", false).await.is_some()
            }));
        }

        let mut hits = 0;
        for handle in handles {
            if handle.await.unwrap() {
                hits += 1;
            }
        }
        assert_eq!(hits, 1, "exactly one caller may observe the expired value");
    }

    #[tokio::test]
    async fn undecodable_entries_are_evicted() {
        let (storage, cache) = cache_over_memory();
        storage
            .store("k", b"not json", SystemTime::now(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get::<String>("k", false).await.is_none());
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memoize_computes_exactly_once_within_ttl() {
        let (_, cache) = cache_over_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let memoized = cache.memoize("lookup:{}", Duration::from_secs(60), false, move |arg: &String| {
            let counter = counter.clone();
            let arg = arg.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<String, std::convert::Infallible>(format!("value-for-{arg}"))
            }
        });

        let a1 = memoized.call(&"a".to_string()).await.unwrap();
        let a2 = memoized.call(&"a".to_string()).await.unwrap();
        let b = memoized.call(&"b".to_string()).await.unwrap();

        assert_eq!(a1, "value-for-a");
        assert_eq!(a2, "value-for-a");
        assert_eq!(b, "value-for-b");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one compute per distinct key");
    }
}
