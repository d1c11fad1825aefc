//! Download backend abstraction.
//!
//! The orchestrator only ever sees [`JobStatus`]; wire formats stay inside the
//! client implementations.

pub mod sabnzbd;

use async_trait::async_trait;

pub use self::sabnzbd::SabnzbdClient;

/// Errors from talking to the download backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Backend rejected the request: {reason}")]
    Rejected { reason: String },

    #[error("Unexpected backend response: {reason}")]
    InvalidResponse { reason: String },
}

/// Normalized state of one backend job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Waiting in the queue, or not visible yet
    Queued,
    /// Downloading or post-processing
    Active { progress: Option<f32> },
    /// Finished; `job_name` is the folder name the backend reported
    Completed { job_name: Option<String> },
    Failed { message: String },
}

/// Queue-based downloader that accepts jobs by URL.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Queues a download and returns the backend job id.
    ///
    /// # Errors
    /// - `BackendError::Rejected` - Backend refused the job
    /// - `BackendError::Request` - Network failure or timeout
    async fn submit(
        &self,
        download_url: &str,
        category: &str,
        job_name: &str,
    ) -> Result<String, BackendError>;

    /// Reads the current status of a job.
    ///
    /// # Errors
    /// - `BackendError::Request` - Network failure or timeout
    /// - `BackendError::InvalidResponse` - Response could not be interpreted
    async fn poll(&self, job_id: &str, category: &str) -> Result<JobStatus, BackendError>;
}
