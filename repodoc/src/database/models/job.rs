//! Job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_rfc3339;

/// Job database model.
/// One request to document one repository.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    /// Source repository URL as submitted
    pub repo_url: String,
    /// Status: queued, cloning, parsing, generating, building, uploading, completed, failed
    pub status: String,
    /// Human-readable description of the last event
    pub message: String,
    /// Retrieval URL, present only when status is completed
    pub download_url: Option<String>,
    /// RFC 3339 timestamp when the job was created
    pub created_at: String,
    /// RFC 3339 timestamp when the job was last updated
    pub updated_at: String,
}

impl JobDbModel {
    pub fn new(id: impl Into<String>, repo_url: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: id.into(),
            repo_url: repo_url.into(),
            status: JobStatus::Queued.to_string(),
            message: "Job queued".to_string(),
            download_url: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Parsed status, if the stored string is recognized.
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

/// Job status values, in pipeline order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted and waiting for a worker.
    Queued,
    Cloning,
    Parsing,
    /// The analysis collaborator is producing documents.
    Generating,
    /// Documents are being written and archived.
    Building,
    Uploading,
    /// Terminal: a retrieval URL is available.
    Completed,
    /// Terminal: an infrastructure failure stopped the pipeline.
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a record in `self` may move to `next`.
    ///
    /// Statuses only move forward through the pipeline order; `failed` is
    /// reachable from any non-terminal status; terminal statuses never change.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next > *self
    }
}

/// Job execution log database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobExecutionLogDbModel {
    pub id: String,
    pub job_id: String,
    /// JSON blob for the log entry
    pub entry: String,
    /// RFC 3339 timestamp
    pub created_at: String,
}

impl JobExecutionLogDbModel {
    pub fn new(job_id: impl Into<String>, entry: &LogEntry) -> crate::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            entry: serde_json::to_string(entry)?,
            created_at: now_rfc3339(),
        })
    }

    /// Decode the stored entry.
    pub fn log_entry(&self) -> crate::Result<LogEntry> {
        Ok(serde_json::from_str(&self.entry)?)
    }
}

/// Log entry structure for job execution logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: "INFO".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: "WARN".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: "ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = JobDbModel::new("j1", "https://example.com/repo.git");
        assert_eq!(job.status, "queued");
        assert_eq!(job.message, "Job queued");
        assert!(job.download_url.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn status_strings_round_trip_through_strum() {
        for status in [
            JobStatus::Queued,
            JobStatus::Cloning,
            JobStatus::Parsing,
            JobStatus::Generating,
            JobStatus::Building,
            JobStatus::Uploading,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let name: &'static str = status.into();
            assert_eq!(status.to_string(), name);
            assert_eq!(name.parse::<JobStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<JobStatus>().is_err());
        assert!("Queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cloning));
        assert!(JobStatus::Cloning.can_transition_to(JobStatus::Uploading));
        assert!(!JobStatus::Building.can_transition_to(JobStatus::Parsing));
        assert!(!JobStatus::Cloning.can_transition_to(JobStatus::Cloning));
    }

    #[test]
    fn failed_reachable_from_any_non_terminal() {
        for status in [
            JobStatus::Queued,
            JobStatus::Cloning,
            JobStatus::Parsing,
            JobStatus::Generating,
            JobStatus::Building,
            JobStatus::Uploading,
        ] {
            assert!(status.can_transition_to(JobStatus::Failed));
        }
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn log_entry_skips_empty_details() {
        let json = serde_json::to_string(&LogEntry::info("hi")).unwrap();
        assert_eq!(json, r#"{"level":"INFO","message":"hi"}"#);

        let entry = LogEntry::warn("slow").with_details(serde_json::json!({"ms": 5}));
        let log = JobExecutionLogDbModel::new("j1", &entry).unwrap();
        assert_eq!(log.log_entry().unwrap(), entry);
    }
}
