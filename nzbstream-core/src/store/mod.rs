//! Shared state across every nzbstream process.
//!
//! The store holds stream metadata and acquisition records and provides the
//! build lock. Production uses Redis; the in-memory store backs tests and
//! single-process deployments.

pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;
use crate::config::StoreConfig;
use crate::types::{AcquisitionRecord, ContentHash, RequestHash, StreamMetadata};

/// Errors raised by store round trips.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection failed: {reason}")]
    Connection { reason: String },

    #[error("Store operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Corrupt store value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Owner token stored as the lock value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Metadata and acquisition record persistence.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads stream metadata by request hash.
    ///
    /// # Errors
    /// - `StoreError::Corrupt` - Stored document is not valid metadata
    async fn load_metadata(&self, key: &RequestHash)
    -> Result<Option<StreamMetadata>, StoreError>;

    /// Stores stream metadata with an expiry.
    async fn save_metadata(
        &self,
        key: &RequestHash,
        metadata: &StreamMetadata,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn delete_metadata(&self, key: &RequestHash) -> Result<(), StoreError>;

    /// Fast-path read of the acquisition record in a single round trip.
    ///
    /// # Errors
    /// - `StoreError::Corrupt` - Stored status is unknown
    async fn load_record(
        &self,
        content_hash: &ContentHash,
    ) -> Result<Option<AcquisitionRecord>, StoreError>;

    /// Atomically writes a record unless a terminal one is already stored.
    ///
    /// Returns `false` when the write was refused.
    async fn write_record(
        &self,
        content_hash: &ContentHash,
        record: &AcquisitionRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn delete_record(&self, content_hash: &ContentHash) -> Result<(), StoreError>;
}

/// Cross-process mutual exclusion with automatic expiry.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Takes the lock if nobody holds it. Returns the owner token on success.
    async fn try_acquire(&self, key: &str, ttl: Duration)
    -> Result<Option<LockToken>, StoreError>;

    /// Resets the expiry of a lock `token` still owns. Returns `false` when
    /// the lock was lost.
    async fn extend(&self, key: &str, token: &LockToken, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Releases the lock if `token` still owns it.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, StoreError>;

    async fn is_locked(&self, key: &str) -> Result<bool, StoreError>;
}

/// Lock key guarding the build of one content hash.
pub fn build_lock_key(content_hash: &ContentHash) -> String {
    format!("build:{content_hash}")
}

/// Both store facets, usually backed by the same connection.
#[derive(Clone)]
pub struct SharedStore {
    pub state: Arc<dyn StateStore>,
    pub lock: Arc<dyn DistributedLock>,
}

impl SharedStore {
    /// Wraps a single value implementing both facets.
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: StateStore + DistributedLock + 'static,
    {
        Self {
            state: store.clone(),
            lock: store,
        }
    }
}

/// Opens the store named by `config.url`.
///
/// # Errors
/// - `StoreError::Connection` - Redis URL is invalid or unreachable
pub async fn open_store(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    if config.url.eq_ignore_ascii_case("memory") {
        tracing::warn!("Using process-local memory store; acquisitions are not shared");
        return Ok(SharedStore::from_backend(Arc::new(InMemoryStore::new())));
    }

    let store = RedisStore::connect(config).await?;
    Ok(SharedStore::from_backend(Arc::new(store)))
}
