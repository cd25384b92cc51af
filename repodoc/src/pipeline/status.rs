//! Durable job status records.
//!
//! The [`StatusStore`] is polled by clients and written by exactly one
//! orchestration run per job. It persists through a [`JobRepository`] when
//! one is configured and otherwise keeps records in memory, which is what the
//! tests and single-process setups without a database use.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::models::{JobDbModel, JobExecutionLogDbModel, JobStatus, LogEntry};
use crate::database::repositories::JobRepository;
use crate::database::time::now_rfc3339;
use crate::{Error, Result};

/// Client-facing view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub repo_url: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<JobDbModel> for JobRecord {
    type Error = Error;

    fn try_from(model: JobDbModel) -> Result<Self> {
        let status = model.status.parse::<JobStatus>().map_err(|_| {
            Error::Database(format!(
                "job {} has unknown status '{}'",
                model.id, model.status
            ))
        })?;
        Ok(Self {
            job_id: model.id,
            status,
            repo_url: model.repo_url,
            message: model.message,
            download_url: model.download_url,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

impl From<&JobRecord> for JobDbModel {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.job_id.clone(),
            repo_url: record.repo_url.clone(),
            status: <&'static str>::from(record.status).to_string(),
            message: record.message.clone(),
            download_url: record.download_url.clone(),
            created_at: record.created_at.clone(),
            updated_at: record.updated_at.clone(),
        }
    }
}

/// Fields to merge into a job record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub repo_url: Option<String>,
    pub message: Option<String>,
    pub download_url: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(download_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            message: Some(message.into()),
            download_url: Some(download_url.into()),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::status(JobStatus::Failed, message)
    }

    pub fn with_repo_url(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = Some(repo_url.into());
        self
    }
}

/// Whether a stored job may move from `current` to `next`.
///
/// Besides the forward-only pipeline order, a non-terminal job may go back
/// to `cloning`: that is a redelivered task restarting the run from scratch.
fn transition_allowed(current: JobStatus, next: JobStatus) -> bool {
    if current.is_terminal() {
        return false;
    }
    current == next || next == JobStatus::Cloning || current.can_transition_to(next)
}

/// Apply `update` to `record` (or to a fresh record), enforcing that the
/// retrieval URL is present exactly when the job is completed.
fn merge(job_id: &str, existing: Option<JobRecord>, update: JobUpdate) -> Result<JobRecord> {
    let now = now_rfc3339();
    let mut record = match existing {
        Some(record) => record,
        None => JobRecord {
            job_id: job_id.to_string(),
            status: JobStatus::Queued,
            repo_url: String::new(),
            message: String::new(),
            download_url: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        },
    };

    if let Some(next) = update.status
        && !transition_allowed(record.status, next)
    {
        return Err(Error::validation(format!(
            "job {} cannot move from {} to {}",
            job_id, record.status, next
        )));
    }

    if let Some(status) = update.status {
        record.status = status;
    }
    if let Some(repo_url) = update.repo_url {
        record.repo_url = repo_url;
    }
    if let Some(message) = update.message {
        record.message = message;
    }
    if let Some(download_url) = update.download_url {
        record.download_url = Some(download_url);
    }

    match record.status {
        JobStatus::Completed => {
            if record.download_url.as_deref().is_none_or(str::is_empty) {
                return Err(Error::validation(format!(
                    "job {} cannot complete without a download URL",
                    job_id
                )));
            }
        }
        _ => record.download_url = None,
    }

    record.updated_at = now;
    Ok(record)
}

/// Job status store.
pub struct StatusStore {
    repository: Option<Arc<dyn JobRepository>>,
    /// Records when running without a repository.
    records: DashMap<String, JobRecord>,
    /// Execution logs when running without a repository.
    logs: DashMap<String, Vec<LogEntry>>,
}

impl StatusStore {
    /// Store backed by the database.
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository: Some(repository),
            records: DashMap::new(),
            logs: DashMap::new(),
        }
    }

    /// Store that keeps everything in process memory.
    pub fn in_memory() -> Self {
        Self {
            repository: None,
            records: DashMap::new(),
            logs: DashMap::new(),
        }
    }

    /// Write the initial `queued` record for a new job.
    pub async fn create(&self, job_id: &str, repo_url: &str) -> Result<JobRecord> {
        let model = JobDbModel::new(job_id, repo_url);
        let record = JobRecord::try_from(model.clone())?;
        match &self.repository {
            Some(repo) => repo.upsert_job(&model).await?,
            None => {
                self.records.insert(job_id.to_string(), record.clone());
            }
        }
        debug!(job_id = %job_id, "Created job record");
        Ok(record)
    }

    /// Merge `update` into the job's record, creating it if absent.
    pub async fn set(&self, job_id: &str, update: JobUpdate) -> Result<JobRecord> {
        match &self.repository {
            Some(repo) => {
                let existing = match repo.find_job(job_id).await? {
                    Some(model) => Some(JobRecord::try_from(model)?),
                    None => None,
                };
                let record = merge(job_id, existing, update)?;
                repo.upsert_job(&JobDbModel::from(&record)).await?;
                Ok(record)
            }
            None => {
                let existing = self.records.get(job_id).map(|r| r.value().clone());
                let record = merge(job_id, existing, update)?;
                self.records.insert(job_id.to_string(), record.clone());
                Ok(record)
            }
        }
    }

    /// Current record for `job_id`.
    pub async fn get(&self, job_id: &str) -> Result<JobRecord> {
        match &self.repository {
            Some(repo) => JobRecord::try_from(repo.get_job(job_id).await?),
            None => {
                let record = self.records.get(job_id).map(|r| r.value().clone());
                record.ok_or_else(|| Error::not_found("Job", job_id))
            }
        }
    }

    /// Append an entry to the job's execution log.
    ///
    /// Log writes are best effort: failures are reported and swallowed.
    pub async fn append_log(&self, job_id: &str, entry: LogEntry) {
        match &self.repository {
            Some(repo) => {
                let result = match JobExecutionLogDbModel::new(job_id, &entry) {
                    Ok(log) => repo.add_execution_log(&log).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!(job_id = %job_id, error = %e, "Failed to write execution log");
                }
            }
            None => {
                self.logs.entry(job_id.to_string()).or_default().push(entry);
            }
        }
    }

    /// Execution log of a job, oldest first.
    pub async fn logs(&self, job_id: &str) -> Result<Vec<LogEntry>> {
        // Unknown jobs are NotFound rather than an empty log.
        self.get(job_id).await?;
        match &self.repository {
            Some(repo) => repo
                .get_execution_logs(job_id)
                .await?
                .iter()
                .map(JobExecutionLogDbModel::log_entry)
                .collect(),
            None => {
                let logs = self.logs.get(job_id).map(|l| l.value().clone());
                Ok(logs.unwrap_or_default())
            }
        }
    }

    /// Whether a database backs this store.
    pub fn is_persistent(&self) -> bool {
        self.repository.is_some()
    }
}
