//! Mock collaborators for exercising acquisition without a backend or share.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::acquisition::health::{FailureReport, HealthReportError, IndexerHealthReporter};
use crate::backend::{BackendError, DownloadBackend, JobStatus};
use crate::webdav::{DirEntry, RemoteFilesystem, WebDavError, normalize_path};

/// In-memory directory tree.
#[derive(Debug, Default)]
pub struct MockRemoteFs {
    dirs: Mutex<HashMap<String, Vec<DirEntry>>>,
    looping: Vec<String>,
    failing: HashSet<String>,
    listings: Arc<AtomicUsize>,
}

impl MockRemoteFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: &str, entries: Vec<DirEntry>) -> Self {
        self.insert_dir(path, entries);
        self
    }

    /// Every directory at or below `path` lists a child directory with the
    /// same name as its parent, forming an endless chain.
    pub fn with_looping_dir(mut self, path: &str) -> Self {
        self.looping.push(normalize_path(path));
        self
    }

    /// Listing `path` fails with HTTP 503.
    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(normalize_path(path));
        self
    }

    /// Adds or replaces a directory after construction.
    pub fn insert_dir(&self, path: &str, entries: Vec<DirEntry>) {
        self.dirs.lock().insert(normalize_path(path), entries);
    }

    pub fn listing_counter(&self) -> Arc<AtomicUsize> {
        self.listings.clone()
    }
}

#[async_trait]
impl RemoteFilesystem for MockRemoteFs {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, WebDavError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let path = normalize_path(path);

        if self.failing.contains(&path) {
            return Err(WebDavError::Status { status: 503, path });
        }
        if let Some(entries) = self.dirs.lock().get(&path) {
            return Ok(entries.clone());
        }
        if self.looping.iter().any(|root| path.starts_with(root.as_str())) {
            let name = path.rsplit('/').next().unwrap_or_default();
            return Ok(vec![DirEntry::directory(name)]);
        }
        Err(WebDavError::NotFound { path })
    }
}

/// How a mock job behaves once submitted.
#[derive(Debug, Clone)]
pub enum MockJobPlan {
    /// Completes on the given poll; the folder is revealed at that point
    CompleteAfter {
        polls: usize,
        job_name: Option<String>,
    },
    FailAfter { polls: usize, message: String },
    /// Every poll returns a transport error
    PollError,
    /// Stays queued forever
    Stalled,
}

struct Reveal {
    fs: Arc<MockRemoteFs>,
    path: String,
    entries: Vec<DirEntry>,
}

/// Scripted download backend with call counters.
pub struct MockBackend {
    plan: Mutex<MockJobPlan>,
    submit_error: Option<String>,
    submit_delay: Duration,
    reveal: Mutex<Option<Reveal>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl MockBackend {
    pub fn new(plan: MockJobPlan) -> Self {
        Self {
            plan: Mutex::new(plan),
            submit_error: None,
            submit_delay: Duration::ZERO,
            reveal: Mutex::new(None),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn completing_after(polls: usize) -> Self {
        Self::new(MockJobPlan::CompleteAfter {
            polls,
            job_name: None,
        })
    }

    pub fn failing_after(polls: usize, message: &str) -> Self {
        Self::new(MockJobPlan::FailAfter {
            polls,
            message: message.to_string(),
        })
    }

    /// Every submit is refused with `reason`.
    pub fn rejecting_submits(reason: &str) -> Self {
        Self {
            submit_error: Some(reason.to_string()),
            ..Self::new(MockJobPlan::Stalled)
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    /// Publishes `entries` under `path` on `fs` when the job completes.
    pub fn revealing(self, fs: Arc<MockRemoteFs>, path: &str, entries: Vec<DirEntry>) -> Self {
        *self.reveal.lock() = Some(Reveal {
            fs,
            path: path.to_string(),
            entries,
        });
        self
    }

    pub fn set_plan(&self, plan: MockJobPlan) {
        *self.plan.lock() = plan;
        self.polls.store(0, Ordering::SeqCst);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadBackend for MockBackend {
    async fn submit(
        &self,
        _download_url: &str,
        _category: &str,
        _job_name: &str,
    ) -> Result<String, BackendError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        if let Some(reason) = &self.submit_error {
            return Err(BackendError::Rejected {
                reason: reason.clone(),
            });
        }
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock_nzo_{n}"))
    }

    async fn poll(&self, _job_id: &str, _category: &str) -> Result<JobStatus, BackendError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let plan = self.plan.lock().clone();

        match plan {
            MockJobPlan::CompleteAfter { polls, job_name } if n >= polls => {
                if let Some(reveal) = self.reveal.lock().as_ref() {
                    reveal.fs.insert_dir(&reveal.path, reveal.entries.clone());
                }
                Ok(JobStatus::Completed { job_name })
            }
            MockJobPlan::FailAfter { polls, message } if n >= polls => {
                Ok(JobStatus::Failed { message })
            }
            MockJobPlan::PollError => Err(BackendError::HttpStatus { status: 502 }),
            MockJobPlan::Stalled => Ok(JobStatus::Queued),
            _ => Ok(JobStatus::Active {
                progress: Some(50.0),
            }),
        }
    }
}

/// Collects every failure report it receives.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    reports: Mutex<Vec<FailureReport>>,
}

impl RecordingHealthReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl IndexerHealthReporter for RecordingHealthReporter {
    async fn report_failure(&self, report: &FailureReport) -> Result<(), HealthReportError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}
