//! Process-local store with the same semantics as the Redis store.
//!
//! Expiry uses tokio's clock so paused-time tests can fast-forward TTLs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{DistributedLock, LockToken, StateStore, StoreError};
use crate::types::{AcquisitionRecord, ContentHash, RequestHash, StreamMetadata};

#[derive(Debug, Clone)]
enum StoredValue {
    Metadata(StreamMetadata),
    Record(AcquisitionRecord),
    Lock(LockToken),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Instant,
}

/// In-memory implementation of [`StateStore`] and [`DistributedLock`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_live(&self, key: &str) -> Option<StoredValue> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: String, value: StoredValue, ttl: Duration) {
        self.entries.lock().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Number of live keys, for assertions in tests.
    pub fn live_keys(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

fn metadata_key(key: &RequestHash) -> String {
    format!("meta:{key}")
}

fn record_key(hash: &ContentHash) -> String {
    format!("acq:{hash}")
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load_metadata(
        &self,
        key: &RequestHash,
    ) -> Result<Option<StreamMetadata>, StoreError> {
        match self.get_live(&metadata_key(key)) {
            Some(StoredValue::Metadata(metadata)) => Ok(Some(metadata)),
            Some(_) => Err(StoreError::Corrupt {
                key: metadata_key(key),
                reason: "value is not stream metadata".to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn save_metadata(
        &self,
        key: &RequestHash,
        metadata: &StreamMetadata,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.put(
            metadata_key(key),
            StoredValue::Metadata(metadata.clone()),
            ttl,
        );
        Ok(())
    }

    async fn delete_metadata(&self, key: &RequestHash) -> Result<(), StoreError> {
        self.remove(&metadata_key(key));
        Ok(())
    }

    async fn load_record(
        &self,
        content_hash: &ContentHash,
    ) -> Result<Option<AcquisitionRecord>, StoreError> {
        match self.get_live(&record_key(content_hash)) {
            Some(StoredValue::Record(record)) => Ok(Some(record)),
            Some(_) => Err(StoreError::Corrupt {
                key: record_key(content_hash),
                reason: "value is not an acquisition record".to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn write_record(
        &self,
        content_hash: &ContentHash,
        record: &AcquisitionRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = record_key(content_hash);
        let mut entries = self.entries.lock();
        let now = Instant::now();

        if let Some(Entry {
            value: StoredValue::Record(existing),
            expires_at,
        }) = entries.get(&key)
        {
            if *expires_at > now && existing.is_terminal() {
                return Ok(false);
            }
        }

        entries.insert(
            key,
            Entry {
                value: StoredValue::Record(record.clone()),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_record(&self, content_hash: &ContentHash) -> Result<(), StoreError> {
        self.remove(&record_key(content_hash));
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for InMemoryStore {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, StoreError> {
        let key = format!("lock:{key}");
        let mut entries = self.entries.lock();
        let now = Instant::now();

        if entries.get(&key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(None);
        }

        let token = LockToken::generate();
        entries.insert(
            key,
            Entry {
                value: StoredValue::Lock(token.clone()),
                expires_at: now + ttl,
            },
        );
        Ok(Some(token))
    }

    async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = format!("lock:{key}");
        let mut entries = self.entries.lock();
        let now = Instant::now();

        match entries.get_mut(&key) {
            Some(Entry {
                value: StoredValue::Lock(held),
                expires_at,
            }) if held == token && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, StoreError> {
        let key = format!("lock:{key}");
        let mut entries = self.entries.lock();

        let owned = matches!(
            entries.get(&key),
            Some(Entry { value: StoredValue::Lock(held), .. }) if held == token
        );
        if owned {
            entries.remove(&key);
        }
        Ok(owned)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, StoreError> {
        Ok(matches!(
            self.get_live(&format!("lock:{key}")),
            Some(StoredValue::Lock(_))
        ))
    }
}
