//! In-memory storage tier.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{Storage, StorageError, StoredEntry};

/// A mutex-guarded map. Uncapped: entries live until expiry-plus-one-read
/// or explicit deletion, so the working set is bounded by the number of
/// distinct (check, environment) keys.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory storage poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let entries = self.entries.lock().expect("memory storage poisoned");
        Ok(entries.get(key).cloned())
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        added_at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().expect("memory storage poisoned");
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_vec(),
                added_at,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().expect("memory storage poisoned");
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_get_delete_roundtrip() {
        let storage = MemoryStorage::new();
        let now = SystemTime::now();

        storage
            .store("k", b"payload", now, Duration::from_secs(60))
            .await
            .unwrap();
        let entry = storage.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, b"payload");
        assert!(!entry.expired_at(now));

        storage.delete("k").await.unwrap();
        assert!(storage.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_still_returned() {
        let storage = MemoryStorage::new();
        let added = SystemTime::now() - Duration::from_secs(120);

        storage
            .store("k", b"old", added, Duration::from_secs(60))
            .await
            .unwrap();
        let entry = storage.get("k").await.unwrap().unwrap();
        assert!(entry.expired_at(SystemTime::now()));
    }

    #[tokio::test]
    async fn deleting_missing_key_is_not_an_error() {
        let storage = MemoryStorage::new();
        storage.delete("absent").await.unwrap();
    }
}
