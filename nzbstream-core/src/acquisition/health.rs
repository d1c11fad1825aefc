//! Indexer health reporting.
//!
//! When a release turns out to be broken the indexer it came from is told, so
//! the same result is not surfaced again. Reporting is best effort.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::types::StreamMetadata;

#[derive(Debug, thiserror::Error)]
pub enum HealthReportError {
    #[error("Health report request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Health endpoint returned HTTP {status}")]
    Status { status: u16 },
}

/// A broken release, as reported to the indexer side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    pub indexer: Option<String>,
    pub source_file_id: Option<String>,
    pub title: String,
    pub download_url: String,
    pub reason: String,
}

impl FailureReport {
    pub fn new(metadata: &StreamMetadata, reason: impl Into<String>) -> Self {
        Self {
            indexer: metadata.source_indexer.clone(),
            source_file_id: metadata.source_file_id.clone(),
            title: metadata.title.clone(),
            download_url: metadata.download_url.clone(),
            reason: reason.into(),
        }
    }
}

/// Receives notifications about releases that failed to acquire.
#[async_trait]
pub trait IndexerHealthReporter: Send + Sync {
    async fn report_failure(&self, report: &FailureReport) -> Result<(), HealthReportError>;
}

/// Logs failures only.
#[derive(Debug, Default)]
pub struct TracingHealthReporter;

#[async_trait]
impl IndexerHealthReporter for TracingHealthReporter {
    async fn report_failure(&self, report: &FailureReport) -> Result<(), HealthReportError> {
        info!(
            indexer = report.indexer.as_deref().unwrap_or("unknown"),
            source_file_id = report.source_file_id.as_deref().unwrap_or("-"),
            "Release '{}' failed: {}",
            report.title,
            report.reason
        );
        Ok(())
    }
}

/// POSTs each report as JSON to a webhook.
pub struct WebhookHealthReporter {
    url: String,
    client: reqwest::Client,
}

impl WebhookHealthReporter {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl IndexerHealthReporter for WebhookHealthReporter {
    async fn report_failure(&self, report: &FailureReport) -> Result<(), HealthReportError> {
        let response = self.client.post(&self.url).json(report).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Health webhook rejected report for '{}'", report.title);
            return Err(HealthReportError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
