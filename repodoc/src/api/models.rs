//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::database::models::{JobStatus, LogEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

/// Body of `POST /start-documentation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDocumentationRequest {
    pub repo_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDocumentationResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogsResponse {
    pub job_id: String,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Storage backend in use.
    pub storage: String,
}
