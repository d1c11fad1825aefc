//! Acquisition orchestration.
//!
//! Turns a request hash into a playable file on the remote filesystem. Each
//! content hash moves through `pending` to either `ready` or `failed`, and
//! both terminal states are sticky in the shared store until explicitly
//! invalidated.
//!
//! Concurrency is handled at two levels. Inside one process, concurrent
//! callers for a content hash share one build through the local cache. Across
//! processes, only the holder of the distributed build lock talks to the
//! backend; everybody else polls the shared record until it settles.

pub mod backoff;
pub mod error;
pub mod health;


use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, trace, warn};

use self::backoff::Backoff;
pub use self::error::AcquisitionError;
pub use self::health::{
    FailureReport, IndexerHealthReporter, TracingHealthReporter, WebhookHealthReporter,
};
use crate::backend::{DownloadBackend, JobStatus};
use crate::cache::LocalCache;
use crate::config::{
    AcquisitionConfig, BackendConfig, LockContentionPolicy, NzbStreamConfig, StoreConfig,
};
use crate::store::{LockToken, SharedStore, build_lock_key};
use crate::types::{
    AcquisitionRecord, AcquisitionStatus, ContentHash, PlayableFile, RequestHash,
    RequestedEpisode, StreamMetadata, sanitize_job_name,
};
use crate::webdav::{FileCandidate, FileResolver, RemoteFilesystem};

/// Times a waiter retries the lock after seeing it released.
const MAX_LOCK_ROUNDS: usize = 3;

/// Result of reading the shared record.
enum Settled {
    Ready(PlayableFile),
    Failed(AcquisitionError),
    /// A backend job was submitted earlier and has not settled yet
    InFlight { job_id: String },
    Unsettled,
}

enum WaitOutcome {
    Settled(PlayableFile),
    LockFreed,
    Expired,
}

/// Everything one build needs, owned so it can move into a task.
struct BuildContext {
    request_hash: RequestHash,
    metadata: StreamMetadata,
    content_hash: ContentHash,
    episode: Option<RequestedEpisode>,
}

/// Snapshot of the state behind one request hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInspection {
    pub request_hash: RequestHash,
    pub content_hash: ContentHash,
    pub metadata: StreamMetadata,
    pub record: Option<AcquisitionRecord>,
    pub build_locked: bool,
    pub cached_locally: bool,
}

/// Coordinates metadata, shared records, the build lock and the backend.
///
/// Cheap to clone; clones share state. Separate instances built over the
/// same store behave like separate processes.
#[derive(Clone)]
pub struct AcquisitionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    store: SharedStore,
    cache: LocalCache,
    backend: Arc<dyn DownloadBackend>,
    resolver: FileResolver,
    health: Arc<dyn IndexerHealthReporter>,
    categories: BackendConfig,
    ttls: StoreConfig,
    config: AcquisitionConfig,
    shutdown: CancellationToken,
}

impl AcquisitionService {
    pub fn new(
        config: &NzbStreamConfig,
        store: SharedStore,
        backend: Arc<dyn DownloadBackend>,
        fs: Arc<dyn RemoteFilesystem>,
        health: Arc<dyn IndexerHealthReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                store,
                cache: LocalCache::new(&config.cache),
                backend,
                resolver: FileResolver::new(fs, config.webdav.max_depth),
                health,
                categories: config.backend.clone(),
                ttls: config.store.clone(),
                config: config.acquisition.clone(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    /// Stops every polling loop; in-flight builds end with `Cancelled`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolves a request hash to a playable file, acquiring it if needed.
    ///
    /// Cancelling `cancel` returns early with `Cancelled`; the build itself
    /// keeps running so the next request finds it settled.
    ///
    /// # Errors
    /// - `AcquisitionError::MetadataMissing` - Request hash is unknown or expired
    /// - `AcquisitionError::AcquisitionFailed` - Backend failed now or earlier
    /// - `AcquisitionError::NoPlayableFile` - Download holds no usable video
    /// - `AcquisitionError::Timeout` - Backend or lock holder took too long
    #[instrument(skip_all, fields(request = %request_hash, episode = ?episode))]
    pub async fn acquire(
        &self,
        request_hash: &RequestHash,
        episode: Option<RequestedEpisode>,
        cancel: &CancellationToken,
    ) -> Result<PlayableFile, AcquisitionError> {
        let inner = &self.inner;
        let metadata = self.resolve_metadata(request_hash).await?;
        let content_hash = metadata.content_hash();

        if let Some(file) = inner.cache.playable(&content_hash).await {
            trace!("Served from local cache");
            return Ok(file);
        }

        match inner.fast_path(&content_hash).await? {
            Settled::Ready(file) => {
                debug!("Fast path hit");
                inner.cache.insert_playable(file.clone()).await;
                return Ok(file);
            }
            Settled::Failed(err) => {
                debug!("Content previously failed: {}", err);
                inner.spawn_failure_cleanup(request_hash.clone(), None);
                return Err(err);
            }
            Settled::InFlight { .. } | Settled::Unsettled => {}
        }

        let builder = inner.clone();
        let ctx = BuildContext {
            request_hash: request_hash.clone(),
            metadata,
            content_hash: content_hash.clone(),
            episode,
        };
        let flight = inner.cache.get_or_build(&content_hash, async move {
            tokio::spawn(builder.run_flight(ctx).in_current_span())
                .await
                .unwrap_or_else(|e| {
                    Err(AcquisitionError::Internal {
                        reason: format!("build task failed: {e}"),
                    })
                })
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Caller went away before the build settled");
                Err(AcquisitionError::Cancelled)
            }
            result = flight => result.map_err(|err| (*err).clone()),
        }
    }

    /// Stores metadata for a freshly surfaced result and returns its key.
    ///
    /// # Errors
    /// - `AcquisitionError::Store` - Shared store rejected the write
    pub async fn publish(
        &self,
        metadata: &StreamMetadata,
    ) -> Result<RequestHash, AcquisitionError> {
        let request_hash = RequestHash::for_metadata(metadata);
        self.inner
            .store
            .state
            .save_metadata(&request_hash, metadata, self.inner.ttls.metadata_ttl)
            .await?;
        self.inner
            .cache
            .insert_metadata(request_hash.clone(), metadata.clone())
            .await;

        debug!(request = %request_hash, "Published stream metadata");
        Ok(request_hash)
    }

    /// Forgets a request hash and the acquisition record it points at.
    ///
    /// Returns the content hash that was invalidated, if the metadata was known.
    pub async fn invalidate(
        &self,
        request_hash: &RequestHash,
    ) -> Result<Option<ContentHash>, AcquisitionError> {
        let metadata = match self.inner.cache.metadata(request_hash).await {
            Some(metadata) => Some(metadata),
            None => self.inner.store.state.load_metadata(request_hash).await?,
        };

        let content_hash = metadata.as_ref().map(StreamMetadata::content_hash);
        if let Some(hash) = &content_hash {
            self.invalidate_content(hash).await?;
        }

        self.inner.store.state.delete_metadata(request_hash).await?;
        self.inner.cache.invalidate_metadata(request_hash).await;
        info!(request = %request_hash, "Invalidated stream");
        Ok(content_hash)
    }

    /// Deletes the acquisition record so the next request rebuilds it.
    pub async fn invalidate_content(
        &self,
        content_hash: &ContentHash,
    ) -> Result<(), AcquisitionError> {
        self.inner.store.state.delete_record(content_hash).await?;
        self.inner.cache.invalidate_playable(content_hash).await;
        info!(content = %content_hash, "Invalidated acquisition record");
        Ok(())
    }

    /// Reports what the store and local cache know about a request hash.
    pub async fn inspect(
        &self,
        request_hash: &RequestHash,
    ) -> Result<Option<StreamInspection>, AcquisitionError> {
        let inner = &self.inner;
        let metadata = match inner.cache.metadata(request_hash).await {
            Some(metadata) => metadata,
            None => match inner.store.state.load_metadata(request_hash).await? {
                Some(metadata) => metadata,
                None => return Ok(None),
            },
        };

        let content_hash = metadata.content_hash();
        let record = inner.store.state.load_record(&content_hash).await?;
        let build_locked = inner
            .store
            .lock
            .is_locked(&build_lock_key(&content_hash))
            .await?;
        let cached_locally = inner.cache.playable(&content_hash).await.is_some();

        Ok(Some(StreamInspection {
            request_hash: request_hash.clone(),
            content_hash,
            metadata,
            record,
            build_locked,
            cached_locally,
        }))
    }

    async fn resolve_metadata(
        &self,
        request_hash: &RequestHash,
    ) -> Result<StreamMetadata, AcquisitionError> {
        if let Some(metadata) = self.inner.cache.metadata(request_hash).await {
            return Ok(metadata);
        }

        match self.inner.store.state.load_metadata(request_hash).await? {
            Some(metadata) => {
                self.inner
                    .cache
                    .insert_metadata(request_hash.clone(), metadata.clone())
                    .await;
                Ok(metadata)
            }
            None => Err(AcquisitionError::MetadataMissing {
                request_hash: request_hash.to_string(),
            }),
        }
    }
}

impl ServiceInner {
    /// Single round trip to the shared record.
    async fn fast_path(&self, content_hash: &ContentHash) -> Result<Settled, AcquisitionError> {
        let Some(record) = self.store.state.load_record(content_hash).await? else {
            return Ok(Settled::Unsettled);
        };

        match record.status {
            AcquisitionStatus::Ready => match record.playable(content_hash) {
                Some(file) => Ok(Settled::Ready(file)),
                None => {
                    warn!(content = %content_hash, "Ready record has no view path, discarding");
                    self.store.state.delete_record(content_hash).await?;
                    Ok(Settled::Unsettled)
                }
            },
            AcquisitionStatus::Failed => Ok(Settled::Failed(AcquisitionError::AcquisitionFailed {
                message: record
                    .failure_message
                    .unwrap_or_else(|| "Acquisition failed".to_string()),
                job_id: record.backend_job_id,
            })),
            AcquisitionStatus::Pending => Ok(match record.backend_job_id {
                Some(job_id) if !job_id.is_empty() => Settled::InFlight { job_id },
                _ => Settled::Unsettled,
            }),
        }
    }

    #[instrument(skip_all, fields(content = %ctx.content_hash))]
    async fn run_flight(
        self: Arc<Self>,
        ctx: BuildContext,
    ) -> Result<PlayableFile, AcquisitionError> {
        let lock_key = build_lock_key(&ctx.content_hash);

        for round in 0..MAX_LOCK_ROUNDS {
            if let Some(token) = self
                .store
                .lock
                .try_acquire(&lock_key, self.config.lock_ttl)
                .await?
            {
                debug!("Acquired build lock");
                return self.build_holding_lock(&ctx, &lock_key, token).await;
            }

            debug!(round, "Build lock held elsewhere, waiting for result");
            match self.wait_for_builder(&ctx.content_hash, &lock_key).await? {
                WaitOutcome::Settled(file) => return Ok(file),
                WaitOutcome::LockFreed => continue,
                WaitOutcome::Expired => break,
            }
        }

        match self.config.contention_policy {
            LockContentionPolicy::Fail => Err(AcquisitionError::Timeout {
                stage: "waiting for the build lock",
                waited: self.config.lock_wait,
            }),
            LockContentionPolicy::BuildAnyway => {
                if let Some(token) = self
                    .store
                    .lock
                    .try_acquire(&lock_key, self.config.lock_ttl)
                    .await?
                {
                    return self.build_holding_lock(&ctx, &lock_key, token).await;
                }
                warn!("Build lock still contended, building without it");
                self.build_unless_settled(&ctx).await
            }
        }
    }

    /// Builds while renewing the lock, then releases it on every path.
    async fn build_holding_lock(
        &self,
        ctx: &BuildContext,
        lock_key: &str,
        token: LockToken,
    ) -> Result<PlayableFile, AcquisitionError> {
        let result = tokio::select! {
            result = self.build_unless_settled(ctx) => result,
            () = self.keep_lock_alive(lock_key, &token) => Err(AcquisitionError::Internal {
                reason: "lock keep-alive stopped".to_string(),
            }),
        };

        match self.store.lock.release(lock_key, &token).await {
            Ok(true) => debug!("Released build lock"),
            Ok(false) => warn!("Build lock expired before release"),
            Err(e) => warn!("Failed to release build lock: {}", e),
        }
        result
    }

    /// Extends the lock every third of its TTL. Never completes.
    async fn keep_lock_alive(&self, lock_key: &str, token: &LockToken) {
        let interval = self.config.lock_ttl / 3;
        loop {
            tokio::time::sleep(interval).await;
            match self
                .store
                .lock
                .extend(lock_key, token, self.config.lock_ttl)
                .await
            {
                Ok(true) => trace!("Extended build lock"),
                Ok(false) => {
                    warn!("Build lock was lost, continuing without it");
                    break;
                }
                Err(e) => warn!("Failed to extend build lock: {}", e),
            }
        }
        std::future::pending::<()>().await;
    }

    /// Polls the shared record until it settles, the lock frees up, or the
    /// wait window closes.
    async fn wait_for_builder(
        &self,
        content_hash: &ContentHash,
        lock_key: &str,
    ) -> Result<WaitOutcome, AcquisitionError> {
        let deadline = Instant::now() + self.config.lock_wait;
        let mut backoff = Backoff::new(self.config.wait_initial, self.config.wait_max);

        loop {
            let delay = backoff.next_delay();
            match self
                .pause(delay, deadline, "waiting for the build lock", self.config.lock_wait)
                .await
            {
                Ok(()) => {}
                Err(AcquisitionError::Timeout { .. }) => return Ok(WaitOutcome::Expired),
                Err(e) => return Err(e),
            }

            match self.fast_path(content_hash).await? {
                Settled::Ready(file) => return Ok(WaitOutcome::Settled(file)),
                Settled::Failed(err) => return Err(err),
                Settled::InFlight { .. } | Settled::Unsettled => {}
            }
            if !self.store.lock.is_locked(lock_key).await? {
                return Ok(WaitOutcome::LockFreed);
            }
        }
    }

    /// Re-reads the record before building, since it may have settled while
    /// the lock was being taken. A job submitted by an earlier build that
    /// timed out or was abandoned is resumed rather than submitted again.
    async fn build_unless_settled(
        &self,
        ctx: &BuildContext,
    ) -> Result<PlayableFile, AcquisitionError> {
        match self.fast_path(&ctx.content_hash).await? {
            Settled::Ready(file) => Ok(file),
            Settled::Failed(err) => Err(err),
            Settled::InFlight { job_id } => {
                let category = self.category_for(ctx);
                info!(job_id = %job_id, "Resuming backend job from an earlier build");
                self.poll_until_settled(ctx, &category, &ctx.metadata.job_name(), &job_id)
                    .await
            }
            Settled::Unsettled => self.build(ctx).await,
        }
    }

    fn category_for(&self, ctx: &BuildContext) -> String {
        self.categories
            .category_for(ctx.metadata.content_type)
            .to_string()
    }

    async fn build(&self, ctx: &BuildContext) -> Result<PlayableFile, AcquisitionError> {
        let category = self.category_for(ctx);
        let job_name = ctx.metadata.job_name();

        match self
            .resolver
            .find_best_file(&category, &job_name, ctx.episode)
            .await
        {
            Ok(Some(candidate)) => {
                info!(path = %candidate.path, "Download already present, skipping backend");
                return self.mark_ready(ctx, None, candidate).await;
            }
            Ok(None) => {}
            Err(e) => debug!("Pre-existing download check failed: {}", e),
        }

        let job_id = self
            .backend
            .submit(&ctx.metadata.download_url, &category, &job_name)
            .await
            .map_err(|e| AcquisitionError::BackendSubmitFailed {
                reason: e.to_string(),
            })?;
        info!(job_id = %job_id, category = %category, "Submitted '{}' to backend", job_name);

        let pending = AcquisitionRecord::pending(&job_id);
        if let Err(e) = self
            .store
            .state
            .write_record(&ctx.content_hash, &pending, self.ttls.pending_ttl)
            .await
        {
            warn!("Failed to record pending job {}: {}", job_id, e);
        }

        self.poll_until_settled(ctx, &category, &job_name, &job_id)
            .await
    }

    async fn poll_until_settled(
        &self,
        ctx: &BuildContext,
        category: &str,
        job_name: &str,
        job_id: &str,
    ) -> Result<PlayableFile, AcquisitionError> {
        let deadline = Instant::now() + self.config.poll_deadline;
        let mut backoff =
            Backoff::new(self.config.poll_initial, self.config.poll_max).with_factor(1.5);
        let mut consecutive_errors = 0u32;

        loop {
            match self.backend.poll(job_id, category).await {
                Ok(JobStatus::Completed { job_name: reported }) => {
                    consecutive_errors = 0;
                    let folder = sanitize_job_name(reported.as_deref().unwrap_or(job_name));
                    match self
                        .resolver
                        .find_best_file(category, &folder, ctx.episode)
                        .await
                    {
                        Ok(Some(candidate)) => {
                            return self
                                .mark_ready(ctx, Some(job_id.to_string()), candidate)
                                .await;
                        }
                        Ok(None) => {
                            let err = AcquisitionError::NoPlayableFile { job_name: folder };
                            return self.mark_failed(ctx, Some(job_id.to_string()), err).await;
                        }
                        Err(e) => {
                            warn!("Completed job folder {} not readable yet: {}", folder, e);
                        }
                    }
                }
                Ok(JobStatus::Failed { message }) => {
                    let err = AcquisitionError::AcquisitionFailed {
                        message,
                        job_id: Some(job_id.to_string()),
                    };
                    return self.mark_failed(ctx, Some(job_id.to_string()), err).await;
                }
                Ok(status) => {
                    consecutive_errors = 0;
                    trace!(?status, "Job still in progress");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(attempt = consecutive_errors, "Polling job {} failed: {}", job_id, e);
                    if consecutive_errors >= self.config.max_poll_errors {
                        return Err(AcquisitionError::BackendPollFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }

            self.pause(
                backoff.next_delay(),
                deadline,
                "polling the download backend",
                self.config.poll_deadline,
            )
            .await?;
        }
    }

    /// Sleeps for `delay`, clamped to `deadline`.
    ///
    /// Fails with `Timeout` once the deadline has passed and with `Cancelled`
    /// on shutdown.
    async fn pause(
        &self,
        delay: Duration,
        deadline: Instant,
        stage: &'static str,
        window: Duration,
    ) -> Result<(), AcquisitionError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(AcquisitionError::Timeout {
                stage,
                waited: window,
            });
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(AcquisitionError::Cancelled),
            _ = tokio::time::sleep_until((now + delay).min(deadline)) => Ok(()),
        }
    }

    async fn mark_ready(
        &self,
        ctx: &BuildContext,
        job_id: Option<String>,
        candidate: FileCandidate,
    ) -> Result<PlayableFile, AcquisitionError> {
        let record = AcquisitionRecord::ready(job_id, &candidate.path, &candidate.name);
        match self
            .store
            .state
            .write_record(&ctx.content_hash, &record, self.ttls.record_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Record settled elsewhere first, keeping stored outcome");
                match self.fast_path(&ctx.content_hash).await? {
                    Settled::Ready(file) => return Ok(file),
                    Settled::Failed(err) => return Err(err),
                    Settled::InFlight { .. } | Settled::Unsettled => {}
                }
            }
            Err(e) => warn!("Failed to persist ready record: {}", e),
        }

        info!(path = %candidate.path, size = candidate.size, "Acquisition ready");
        Ok(PlayableFile {
            content_hash: ctx.content_hash.clone(),
            view_path: candidate.path,
            file_name: candidate.name,
        })
    }

    /// Persists a terminal failure and schedules cleanup.
    ///
    /// If another builder already stored an outcome, that outcome wins and
    /// no cleanup runs.
    async fn mark_failed(
        &self,
        ctx: &BuildContext,
        job_id: Option<String>,
        err: AcquisitionError,
    ) -> Result<PlayableFile, AcquisitionError> {
        let record = AcquisitionRecord::failed(job_id, err.diagnostic());
        match self
            .store
            .state
            .write_record(&ctx.content_hash, &record, self.ttls.record_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Record settled elsewhere first, keeping stored outcome");
                match self.fast_path(&ctx.content_hash).await? {
                    Settled::Ready(file) => return Ok(file),
                    Settled::Failed(stored) => return Err(stored),
                    Settled::InFlight { .. } | Settled::Unsettled => {}
                }
            }
            Err(e) => warn!("Failed to persist failed record: {}", e),
        }

        warn!("Acquisition failed: {}", err);
        let report = FailureReport::new(&ctx.metadata, err.diagnostic());
        self.spawn_failure_cleanup(ctx.request_hash.clone(), Some(report));
        Err(err)
    }

    /// Drops the request's metadata and notifies indexer health in the
    /// background. Failures are logged only.
    fn spawn_failure_cleanup(&self, request_hash: RequestHash, report: Option<FailureReport>) {
        let state = self.store.state.clone();
        let cache = self.cache.clone();
        let health = self.health.clone();

        tokio::spawn(
            async move {
                cache.invalidate_metadata(&request_hash).await;
                if let Err(e) = state.delete_metadata(&request_hash).await {
                    warn!("Failed to delete metadata for {}: {}", request_hash, e);
                }
                if let Some(report) = report {
                    if let Err(e) = health.report_failure(&report).await {
                        warn!("Failed to report broken release '{}': {}", report.title, e);
                    }
                }
            }
            .in_current_span(),
        );
    }
}
