//! On-disk storage tier.
//!
//! One file per key under a versioned directory. Keys are hashed so
//! arbitrary key strings map to safe filenames; values are wrapped in a
//! self-describing JSON envelope carrying the expiry metadata. Writes go
//! through a temp file and an atomic rename.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{Storage, StorageError, StoredEntry};

const LAYOUT_VERSION: &str = "v1";

#[derive(Serialize, Deserialize)]
struct Envelope {
    added_at_unix_ms: u64,
    ttl_ms: u64,
    value: Vec<u8>,
}

/// File-per-key store rooted at `<root>/v1/`.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join(LAYOUT_VERSION),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let mut name = String::with_capacity(64 + 5);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".json");
        self.root.join(name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn to_unix_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_unix_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[async_trait]
impl Storage for DiskStorage {
    fn name(&self) -> &str {
        "disk"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        Ok(Some(StoredEntry {
            value: envelope.value,
            added_at: from_unix_ms(envelope.added_at_unix_ms),
            ttl: Duration::from_millis(envelope.ttl_ms),
        }))
    }

    async fn store(
        &self,
        key: &str,
        value: &[u8],
        added_at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let envelope = Envelope {
            added_at_unix_ms: to_unix_ms(added_at),
            ttl_ms: ttl.as_millis() as u64,
            value: value.to_vec(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let path = self.path_for(key);
        // Stamp the temp name so concurrent writers for the same key cannot
        // clobber each other's half-written file.
        let tmp = path.with_extension(format!("tmp.{}", to_unix_ms(added_at)));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key, path = %path.display(), "Stored cache entry on disk");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_get_roundtrip_preserves_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let added = SystemTime::now();
        let ttl = Duration::from_secs(300);

        storage.store("some/key", b"payload", added, ttl).await.unwrap();
        let entry = storage.get("some/key").await.unwrap().unwrap();

        assert_eq!(entry.value, b"payload");
        assert_eq!(entry.ttl, ttl);
        // Millisecond precision survives the envelope.
        let delta = entry
            .added_at
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i128
            - added.duration_since(UNIX_EPOCH).unwrap().as_millis() as i128;
        assert_eq!(delta, 0);
    }

    #[tokio::test]
    async fn missing_key_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        assert!(storage.get("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());

        storage
            .store("k", b"v", SystemTime::now(), Duration::from_secs(5))
            .await
            .unwrap();
        storage.delete("k").await.unwrap();
        assert!(storage.get("k").await.unwrap().is_none());
        // Deleting again stays quiet.
        storage.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let now = SystemTime::now();

        storage.store("a", b"1", now, Duration::from_secs(5)).await.unwrap();
        storage.store("b", b"2", now, Duration::from_secs(5)).await.unwrap();

        assert_eq!(storage.get("a").await.unwrap().unwrap().value, b"1");
        assert_eq!(storage.get("b").await.unwrap().unwrap().value, b"2");
    }
}
