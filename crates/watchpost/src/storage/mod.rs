//! Storage back-ends for the result cache.
//!
//! A store is a single-tier key/value map over string keys and opaque blob
//! values with absolute-expiry metadata. Stores may return expired entries;
//! expiry policy belongs to the cache layer. Transport errors from
//! persistent back-ends degrade to a cache miss and never reach check code.

mod chained;
mod disk;
mod memory;

pub use chained::ChainedStorage;
pub use disk::DiskStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// A stored blob plus its expiry metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: Vec<u8>,
    pub added_at: SystemTime,
    pub ttl: Duration,
}

impl StoredEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn expired_at(&self, now: SystemTime) -> bool {
        now.duration_since(self.added_at)
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }
}

/// Back-end failure. The cache logs these and treats them as a miss.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Single-tier byte-addressed key/value store with absolute expiry.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Fetch an entry. Expired entries may be returned.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, StorageError>;

    /// Store an entry with the given absolute expiry metadata.
    async fn store(
        &self,
        key: &str,
        value: &[u8],
        added_at: SystemTime,
        ttl: Duration,
    ) -> Result<(), StorageError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
