//! Job submission, status and download routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    DownloadResponse, JobLogsResponse, RootResponse, StartDocumentationRequest,
    StartDocumentationResponse,
};
use crate::api::server::AppState;
use crate::database::models::JobStatus;
use crate::pipeline::JobRecord;

pub const BANNER: &str = "Autonomous Codebase Documenter API is running";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/start-documentation", post(start_documentation))
        .route("/job-status/{job_id}", get(job_status))
        .route("/job-status/{job_id}/logs", get(job_logs))
        .route("/get-docs/{job_id}", get(get_docs))
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: BANNER.to_string(),
    })
}

/// Accept a repository URL and queue a documentation job.
async fn start_documentation(
    State(state): State<AppState>,
    Json(request): Json<StartDocumentationRequest>,
) -> ApiResult<Json<StartDocumentationResponse>> {
    let record = state.gateway.submit(&request.repo_url).await?;
    Ok(Json(StartDocumentationResponse {
        job_id: record.job_id,
        status: record.status,
        message: record.message,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    Ok(Json(state.status.get(&job_id).await?))
}

async fn job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobLogsResponse>> {
    let logs = state.status.logs(&job_id).await?;
    Ok(Json(JobLogsResponse { job_id, logs }))
}

/// Download URL of a completed job.
async fn get_docs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    let record = state.status.get(&job_id).await?;
    if record.status != JobStatus::Completed {
        return Err(ApiError::not_finished("Job not completed yet"));
    }
    let download_url = record
        .download_url
        .ok_or_else(|| ApiError::internal("Completed job has no download URL"))?;
    Ok(Json(DownloadResponse { download_url }))
}
