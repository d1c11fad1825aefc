//! Nzbstream Core - acquisition orchestration for Usenet-backed streaming
//!
//! This crate owns everything between "a client asked for this stream" and
//! "this file on the remote filesystem is playable": shared state in the
//! distributed store, the in-process cache, the download backend client,
//! remote filesystem resolution and the acquisition state machine.

pub mod acquisition;
pub mod backend;
pub mod cache;
pub mod config;
pub mod store;
pub mod tracing_setup;
pub mod types;
pub mod webdav;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Re-export main types for convenient access
pub use acquisition::{AcquisitionError, AcquisitionService, IndexerHealthReporter};
pub use backend::{BackendError, DownloadBackend, JobStatus, SabnzbdClient};
pub use cache::LocalCache;
pub use config::{ConfigError, NzbStreamConfig};
pub use store::{DistributedLock, InMemoryStore, RedisStore, StateStore, StoreError};
pub use types::{
    AcquisitionRecord, AcquisitionStatus, ContentHash, ContentType, PlayableFile, RequestHash,
    RequestedEpisode, StreamMetadata,
};
pub use webdav::{RemoteFilesystem, WebDavClient, WebDavError};

/// Errors that can bubble up from any nzbstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NzbStreamError {
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Download backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Remote filesystem error: {0}")]
    WebDav(#[from] WebDavError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NzbStreamError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            NzbStreamError::Acquisition(e) => e.diagnostic(),
            NzbStreamError::Store(_) => "Shared state store is unavailable".to_string(),
            NzbStreamError::Backend(_) => "Download backend error occurred".to_string(),
            NzbStreamError::WebDav(_) => "Remote filesystem error occurred".to_string(),
            NzbStreamError::Configuration(e) => format!("Configuration error: {e}"),
            NzbStreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is caused by operator input rather than a runtime fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            NzbStreamError::Configuration(_)
                | NzbStreamError::Acquisition(AcquisitionError::MetadataMissing { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, NzbStreamError>;
