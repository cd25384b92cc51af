//! Job submission.

use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::status::{JobRecord, JobUpdate, StatusStore};
use super::task_queue::TaskQueue;
use crate::database::models::TaskMessage;
use crate::{Error, Result};

/// URL schemes a repository can be cloned from.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ssh", "git"];

/// Check that `repo_url` is something the clone stage can use.
pub fn validate_repo_url(repo_url: &str) -> Result<Url> {
    let trimmed = repo_url.trim();
    let url = Url::parse(trimmed).map_err(|_| Error::validation("Invalid URL"))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(Error::validation(format!(
            "Invalid URL: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("Invalid URL: missing host"));
    }
    Ok(url)
}

/// Accepts submissions: validates, records `queued`, enqueues.
#[derive(Clone)]
pub struct SubmissionGateway {
    status: Arc<StatusStore>,
    queue: Arc<TaskQueue>,
}

impl SubmissionGateway {
    pub fn new(status: Arc<StatusStore>, queue: Arc<TaskQueue>) -> Self {
        Self { status, queue }
    }

    /// Submit a repository for documentation. Returns without waiting for the pipeline.
    ///
    /// Invalid URLs are rejected before anything is written.
    pub async fn submit(&self, repo_url: &str) -> Result<JobRecord> {
        let url = validate_repo_url(repo_url)?;
        let repo_url = url.as_str().to_string();

        let job_id = uuid::Uuid::new_v4().to_string();
        let record = self.status.create(&job_id, &repo_url).await?;

        if let Err(e) = self
            .queue
            .enqueue(TaskMessage::document_repo(&job_id, &repo_url))
            .await
        {
            // Don't leave a queued record nobody will ever pick up.
            if let Err(mark_err) = self
                .status
                .set(
                    &job_id,
                    JobUpdate::failed(format!("Failed to enqueue job: {}", e)),
                )
                .await
            {
                warn!(
                    job_id = %job_id,
                    error = %mark_err,
                    "Failed to mark job failed after enqueue error"
                );
            }
            return Err(e);
        }

        info!(job_id = %job_id, repo_url = %repo_url, "Job queued");
        Ok(record)
    }
}
