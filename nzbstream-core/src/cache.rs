//! Bounded in-process caches in front of the shared store.
//!
//! Two caches are kept: stream metadata by request hash, and playable files by
//! content hash. The playable-file cache doubles as the per-process
//! single-flight: concurrent acquisitions of one content hash share a single
//! initialization future. Only successful results are stored.

use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::types::{ContentHash, PlayableFile, RequestHash, StreamMetadata};

/// Process-local cache with explicit size and TTL bounds.
#[derive(Clone)]
pub struct LocalCache {
    metadata: Cache<RequestHash, StreamMetadata>,
    playable: Cache<ContentHash, PlayableFile>,
}

impl LocalCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            metadata: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
            playable: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
        }
    }

    pub async fn metadata(&self, key: &RequestHash) -> Option<StreamMetadata> {
        self.metadata.get(key).await
    }

    pub async fn insert_metadata(&self, key: RequestHash, metadata: StreamMetadata) {
        self.metadata.insert(key, metadata).await;
    }

    pub async fn invalidate_metadata(&self, key: &RequestHash) {
        self.metadata.invalidate(key).await;
    }

    pub async fn playable(&self, content_hash: &ContentHash) -> Option<PlayableFile> {
        self.playable.get(content_hash).await
    }

    pub async fn insert_playable(&self, file: PlayableFile) {
        self.playable.insert(file.content_hash.clone(), file).await;
    }

    pub async fn invalidate_playable(&self, content_hash: &ContentHash) {
        self.playable.invalidate(content_hash).await;
    }

    /// Returns the cached file or runs `build`, sharing one in-flight build
    /// between every concurrent caller for the same content hash.
    ///
    /// Errors are handed to every waiting caller but never cached, so the next
    /// call runs `build` again.
    pub async fn get_or_build<F, E>(
        &self,
        content_hash: &ContentHash,
        build: F,
    ) -> Result<PlayableFile, Arc<E>>
    where
        F: Future<Output = Result<PlayableFile, E>>,
        E: Send + Sync + 'static,
    {
        self.playable.try_get_with(content_hash.clone(), build).await
    }

    /// Approximate entry counts as (metadata, playable).
    pub fn entry_counts(&self) -> (u64, u64) {
        (self.metadata.entry_count(), self.playable.entry_count())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn file(hash: &ContentHash) -> PlayableFile {
        PlayableFile {
            content_hash: hash.clone(),
            view_path: "/content/movies/Job/movie.mkv".to_string(),
            file_name: "movie.mkv".to_string(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_builds_share_one_flight() {
        let cache = LocalCache::new(&CacheConfig::default());
        let hash = ContentHash::from_download_url("https://indexer.example/get/1");
        let runs = Arc::new(AtomicUsize::new(0));

        let callers = (0..8).map(|_| {
            let cache = cache.clone();
            let hash = hash.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                cache
                    .get_or_build(&hash, async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(file(&hash))
                    })
                    .await
            })
        });

        for result in futures::future::join_all(callers).await {
            assert_eq!(result.unwrap().unwrap().file_name, "movie.mkv");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = LocalCache::new(&CacheConfig::default());
        let hash = ContentHash::from_download_url("https://indexer.example/get/2");

        let first = cache
            .get_or_build(&hash, async { Err::<PlayableFile, _>("backend down") })
            .await;
        assert_eq!(*first.unwrap_err(), "backend down");
        assert!(cache.playable(&hash).await.is_none());

        let second = cache
            .get_or_build(&hash, async { Ok::<_, &str>(file(&hash)) })
            .await;
        assert!(second.is_ok());
        assert!(cache.playable(&hash).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entries() {
        let cache = LocalCache::new(&CacheConfig::default());
        let hash = ContentHash::from_download_url("u");
        cache.insert_playable(file(&hash)).await;
        assert!(cache.playable(&hash).await.is_some());

        cache.invalidate_playable(&hash).await;
        assert!(cache.playable(&hash).await.is_none());
    }
}
