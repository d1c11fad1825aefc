//! Acquisition error taxonomy.

use std::time::Duration;

use crate::store::StoreError;

/// Why a stream could not be made playable.
///
/// Terminal variants are persisted as failed records and short-circuit later
/// requests; the rest are retried on the next request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AcquisitionError {
    #[error("No stream metadata for request {request_hash}")]
    MetadataMissing { request_hash: String },

    #[error("Backend refused the download: {reason}")]
    BackendSubmitFailed { reason: String },

    #[error("Backend could not be polled: {reason}")]
    BackendPollFailed { reason: String },

    #[error("Acquisition failed: {message}")]
    AcquisitionFailed {
        message: String,
        job_id: Option<String>,
    },

    #[error("No playable file in {job_name}")]
    NoPlayableFile { job_name: String },

    #[error("Timed out during {stage} after {waited:?}")]
    Timeout {
        stage: &'static str,
        waited: Duration,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Shared store unavailable: {reason}")]
    Store { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl From<StoreError> for AcquisitionError {
    fn from(err: StoreError) -> Self {
        AcquisitionError::Store {
            reason: err.to_string(),
        }
    }
}

impl AcquisitionError {
    /// Terminal failures are recorded and never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AcquisitionError::AcquisitionFailed { .. } | AcquisitionError::NoPlayableFile { .. }
        )
    }

    /// Short explanation for the failure response header.
    pub fn diagnostic(&self) -> String {
        match self {
            AcquisitionError::MetadataMissing { .. } => {
                "Stream link expired or unknown; search again".to_string()
            }
            AcquisitionError::BackendSubmitFailed { reason } => {
                format!("Download backend refused the release: {reason}")
            }
            AcquisitionError::BackendPollFailed { .. } => {
                "Download backend is not responding".to_string()
            }
            AcquisitionError::AcquisitionFailed { message, .. } => message.clone(),
            AcquisitionError::NoPlayableFile { job_name } => {
                format!("No playable video found in {job_name}")
            }
            AcquisitionError::Timeout { stage, .. } => format!("Timed out while {stage}"),
            AcquisitionError::Cancelled => "Request cancelled".to_string(),
            AcquisitionError::Store { .. } => "Shared state store is unavailable".to_string(),
            AcquisitionError::Internal { .. } => "Internal error".to_string(),
        }
    }
}
