//! Layered storage: an ordered chain of tiers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::warn;

use super::{Storage, StorageError, StoredEntry};

/// Probes tiers in order and back-propagates hits to earlier tiers.
///
/// A hit from tier *k* is written back to tiers 0..k best-effort; a failed
/// back-propagation never affects the returned value. Writes and deletes
/// fan out to every tier; per-tier failures are logged and swallowed so a
/// broken tier degrades to a miss instead of failing the check.
pub struct ChainedStorage {
    tiers: Vec<Arc<dyn Storage>>,
}

impl ChainedStorage {
    pub fn new(tiers: Vec<Arc<dyn Storage>>) -> Self {
        Self { tiers }
    }
}

#[async_trait]
impl Storage for ChainedStorage {
    fn name(&self) -> &str {
        "chained"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        for (idx, tier) in self.tiers.iter().enumerate() {
            let entry = match tier.get(key).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key, tier = tier.name(), error = %e, "Storage tier read failed");
                    continue;
                }
            };

            if let Some(entry) = entry {
                for earlier in &self.tiers[..idx] {
                    if let Err(e) = earlier
                        .store(key, &entry.value, entry.added_at, entry.ttl)
                        .await
                    {
                        warn!(
                            key,
                            tier = earlier.name(),
                            error = %e,
                            "Back-propagation to earlier tier failed"
                        );
                    }
                }
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        added_at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        for tier in &self.tiers {
            if let Err(e) = tier.store(key, value, added_at, ttl).await {
                warn!(key, tier = tier.name(), error = %e, "Storage tier write failed");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        for tier in &self.tiers {
            if let Err(e) = tier.delete(key).await {
                warn!(key, tier = tier.name(), error = %e, "Storage tier delete failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn chain2() -> (Arc<MemoryStorage>, Arc<MemoryStorage>, ChainedStorage) {
        let first = Arc::new(MemoryStorage::new());
        let second = Arc::new(MemoryStorage::new());
        let chain = ChainedStorage::new(vec![first.clone(), second.clone()]);
        (first, second, chain)
    }

    #[tokio::test]
    async fn store_writes_every_tier() {
        let (first, second, chain) = chain2();
        let now = SystemTime::now();

        chain.store("k", b"v", now, Duration::from_secs(60)).await.unwrap();

        assert_eq!(first.get("k").await.unwrap().unwrap().value, b"v");
        assert_eq!(second.get("k").await.unwrap().unwrap().value, b"v");
    }

    #[tokio::test]
    async fn hit_in_later_tier_back_propagates() {
        let (first, second, chain) = chain2();
        let now = SystemTime::now();

        // Seed only the second tier.
        second.store("k", b"v", now, Duration::from_secs(60)).await.unwrap();
        assert!(first.get("k").await.unwrap().is_none());

        let entry = chain.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"v");

        // The hit is now present in the first tier with the same metadata.
        let promoted = first.get("k").await.unwrap().unwrap();
        assert_eq!(promoted, entry);
    }

    #[tokio::test]
    async fn delete_fans_out() {
        let (first, second, chain) = chain2();
        let now = SystemTime::now();

        chain.store("k", b"v", now, Duration::from_secs(60)).await.unwrap();
        chain.delete("k").await.unwrap();

        assert!(first.get("k").await.unwrap().is_none());
        assert!(second.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn miss_everywhere_is_a_miss() {
        let (_, _, chain) = chain2();
        assert!(chain.get("absent").await.unwrap().is_none());
    }
}
