//! Client for SABnzbd-compatible JSON APIs (SABnzbd itself, nzbdav).

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use super::{BackendError, DownloadBackend, JobStatus};
use crate::config::BackendConfig;

/// Where a job slot was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotSource {
    Queue,
    History,
}

/// HTTP client for the SABnzbd `api` endpoint.
pub struct SabnzbdClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SabnzbdClient {
    /// Creates a client using the configured URL, key and request timeout.
    ///
    /// # Errors
    /// - `BackendError::Request` - HTTP client could not be constructed
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("nzbstream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            api_url: format!("{}/api", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            client,
        })
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<Value, BackendError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str()), ("output", "json")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(reason) = api_error(&body) {
            return Err(BackendError::Rejected { reason });
        }
        Ok(body)
    }

    async fn find_slot(
        &self,
        job_id: &str,
        category: &str,
        source: SlotSource,
    ) -> Result<Option<JobStatus>, BackendError> {
        let mode = match source {
            SlotSource::Queue => "queue",
            SlotSource::History => "history",
        };
        let body = self
            .call(&[("mode", mode), ("nzo_ids", job_id), ("category", category)])
            .await?;

        Ok(slots(&body, mode)
            .iter()
            .find(|slot| slot_job_id(slot).as_deref() == Some(job_id))
            .map(|slot| normalize_slot(slot, source)))
    }
}

#[async_trait]
impl DownloadBackend for SabnzbdClient {
    async fn submit(
        &self,
        download_url: &str,
        category: &str,
        job_name: &str,
    ) -> Result<String, BackendError> {
        debug!("Submitting job '{}' to category '{}'", job_name, category);
        let body = self
            .call(&[
                ("mode", "addurl"),
                ("name", download_url),
                ("nzbname", job_name),
                ("cat", category),
            ])
            .await?;

        submitted_job_id(&body).ok_or_else(|| BackendError::InvalidResponse {
            reason: format!("no job id in addurl response: {body}"),
        })
    }

    async fn poll(&self, job_id: &str, category: &str) -> Result<JobStatus, BackendError> {
        if let Some(status) = self.find_slot(job_id, category, SlotSource::Queue).await? {
            return Ok(status);
        }
        if let Some(status) = self.find_slot(job_id, category, SlotSource::History).await? {
            return Ok(status);
        }
        trace!("Job {} not visible in queue or history yet", job_id);
        Ok(JobStatus::Queued)
    }
}

/// Error string reported by the API, if any.
fn api_error(body: &Value) -> Option<String> {
    if body.get("status").and_then(Value::as_bool) == Some(false) {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Some(reason.to_string());
    }
    body.get("error")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

fn slots<'a>(body: &'a Value, section: &str) -> &'a [Value] {
    body.get(section)
        .and_then(|s| s.get("slots"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string_field(value: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| value.get(*name))
        .find_map(|field| match field {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Job id from an `addurl` response: `nzo_ids`, `nzo_id`, `nzoId` or `id`.
fn submitted_job_id(body: &Value) -> Option<String> {
    let from_list = ["nzo_ids", "nzoIds", "ids"]
        .iter()
        .filter_map(|name| body.get(*name).and_then(Value::as_array))
        .find_map(|ids| ids.first().and_then(Value::as_str).map(str::to_string));

    from_list.or_else(|| slot_job_id(body))
}

fn slot_job_id(slot: &Value) -> Option<String> {
    string_field(slot, &["nzo_id", "nzoId", "id"])
}

/// Maps one queue or history slot to a [`JobStatus`].
///
/// This is the only place that knows the backend's field names and status
/// vocabulary.
fn normalize_slot(slot: &Value, source: SlotSource) -> JobStatus {
    let status = string_field(slot, &["status", "state"])
        .unwrap_or_default()
        .to_lowercase();

    match (source, status.as_str()) {
        (_, "failed") => JobStatus::Failed {
            message: string_field(slot, &["fail_message", "failMessage", "error"])
                .unwrap_or_else(|| "Download failed".to_string()),
        },
        (SlotSource::History, "completed") => JobStatus::Completed {
            job_name: string_field(slot, &["name", "nzb_name", "filename", "jobName"]),
        },
        (SlotSource::Queue, "queued" | "paused" | "grabbing" | "fetching" | "") => {
            JobStatus::Queued
        }
        _ => JobStatus::Active {
            progress: string_field(slot, &["percentage", "progress"])
                .and_then(|p| p.parse::<f32>().ok()),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_submitted_job_id_variants() {
        assert_eq!(
            submitted_job_id(&json!({"status": true, "nzo_ids": ["SABnzbd_nzo_abc"]})),
            Some("SABnzbd_nzo_abc".to_string())
        );
        assert_eq!(
            submitted_job_id(&json!({"nzoId": "nzb-123"})),
            Some("nzb-123".to_string())
        );
        assert_eq!(submitted_job_id(&json!({"id": 77})), Some("77".to_string()));
        assert_eq!(submitted_job_id(&json!({"status": true})), None);
    }

    #[test]
    fn test_api_error_detection() {
        assert_eq!(
            api_error(&json!({"status": false, "error": "API Key Incorrect"})),
            Some("API Key Incorrect".to_string())
        );
        assert_eq!(api_error(&json!({"status": true, "nzo_ids": []})), None);
    }

    #[test]
    fn test_queue_slot_normalization() {
        let queued = json!({"nzo_id": "a", "status": "Queued", "percentage": "0"});
        assert_eq!(normalize_slot(&queued, SlotSource::Queue), JobStatus::Queued);

        let downloading = json!({"nzo_id": "a", "status": "Downloading", "percentage": "42"});
        assert_eq!(
            normalize_slot(&downloading, SlotSource::Queue),
            JobStatus::Active {
                progress: Some(42.0)
            }
        );
    }

    #[test]
    fn test_history_slot_normalization() {
        let completed = json!({"nzo_id": "a", "status": "Completed", "name": "Show.S01E02.1080p"});
        assert_eq!(
            normalize_slot(&completed, SlotSource::History),
            JobStatus::Completed {
                job_name: Some("Show.S01E02.1080p".to_string())
            }
        );

        let failed = json!({"nzoId": "a", "status": "Failed", "fail_message": "Missing articles"});
        assert_eq!(
            normalize_slot(&failed, SlotSource::History),
            JobStatus::Failed {
                message: "Missing articles".to_string()
            }
        );

        let extracting = json!({"id": "a", "status": "Extracting"});
        assert!(matches!(
            normalize_slot(&extracting, SlotSource::History),
            JobStatus::Active { progress: None }
        ));
    }

    #[test]
    fn test_slots_lookup_tolerates_missing_sections() {
        let body = json!({"queue": {"slots": [{"nzo_id": "x"}]}});
        assert_eq!(slots(&body, "queue").len(), 1);
        assert!(slots(&body, "history").is_empty());
    }
}
