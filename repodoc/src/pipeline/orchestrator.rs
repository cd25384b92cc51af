//! Drives one job through the pipeline stages.
//!
//! Before each stage the job's status moves to that stage; a stage error
//! moves it to `failed` and stops the run; success ends in `completed` with
//! the retrieval URL. Scratch paths are removed whatever the outcome.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::stages::{
    JobPaths, PipelineStage, RepositoryCloner, analyze_stage, clone_stage, package_stage,
    parse_stage, upload_stage,
};
use super::status::{JobUpdate, StatusStore};
use crate::Result;
use crate::analysis::AnalysisClient;
use crate::database::models::{JobStatus, LogEntry};
use crate::storage::StorageBackend;
use crate::utils::fs;

/// Final status message of a successful job.
pub const COMPLETED_MESSAGE: &str = "Documentation generated successfully";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { download_url: String },
    /// A stage failed; the job is recorded as `failed` with this message.
    Failed { stage: PipelineStage, message: String },
    /// The job was already terminal (a redelivered task); nothing ran.
    AlreadyFinished(JobStatus),
}

enum Interruption {
    Stage(PipelineStage, crate::Error),
    /// The status store itself failed; nothing more can be recorded.
    StatusStore(crate::Error),
}

/// Collaborators a run needs.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub status: Arc<StatusStore>,
    pub cloner: Arc<dyn RepositoryCloner>,
    pub analysis: Arc<dyn AnalysisClient>,
    pub storage: Arc<dyn StorageBackend>,
}

/// Runs the pipeline for one job at a time; share it across workers.
#[derive(Clone)]
pub struct JobOrchestrator {
    deps: OrchestratorDeps,
    work_dir: PathBuf,
    analysis_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(deps: OrchestratorDeps, work_dir: impl Into<PathBuf>, analysis_timeout: Duration) -> Self {
        Self {
            deps,
            work_dir: work_dir.into(),
            analysis_timeout,
        }
    }

    pub fn status_store(&self) -> &Arc<StatusStore> {
        &self.deps.status
    }

    /// Run the whole pipeline for `job_id`.
    ///
    /// Stage failures are recorded and returned as [`JobOutcome::Failed`].
    /// `Err` means the status store could not be written, so the job's
    /// terminal state is not recorded and the task should be redelivered.
    pub async fn run(&self, job_id: &str, repo_url: &str) -> Result<JobOutcome> {
        if let Ok(existing) = self.deps.status.get(job_id).await
            && existing.status.is_terminal()
        {
            info!(job_id = %job_id, status = %existing.status, "Job already finished, skipping");
            return Ok(JobOutcome::AlreadyFinished(existing.status));
        }

        let paths = JobPaths::new(&self.work_dir, job_id);
        let started = Instant::now();
        info!(job_id = %job_id, repo_url = %repo_url, "Starting documentation job");

        let result = self.execute(&paths, repo_url).await;
        self.cleanup(&paths).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(download_url) => {
                self.deps
                    .status
                    .set(job_id, JobUpdate::completed(&download_url, COMPLETED_MESSAGE))
                    .await?;
                self.log(
                    job_id,
                    LogEntry::info(COMPLETED_MESSAGE).with_details(json!({
                        "download_url": download_url,
                        "duration_ms": elapsed_ms,
                    })),
                )
                .await;
                info!(job_id = %job_id, elapsed_ms, "Job completed");
                Ok(JobOutcome::Completed { download_url })
            }
            Err(Interruption::Stage(stage, e)) => {
                let message = e.to_string();
                error!(job_id = %job_id, stage = %stage, error = %message, "Job failed");
                self.record_failure(job_id, &message).await?;
                self.log(
                    job_id,
                    LogEntry::error(&message).with_details(json!({
                        "stage": stage.to_string(),
                        "retryable": e.is_retryable(),
                        "duration_ms": elapsed_ms,
                    })),
                )
                .await;
                Ok(JobOutcome::Failed { stage, message })
            }
            Err(Interruption::StatusStore(e)) => {
                error!(job_id = %job_id, error = %e, "Status store unavailable, abandoning run");
                Err(e)
            }
        }
    }

    /// Move a job to `failed` unless it is already terminal.
    pub async fn record_failure(&self, job_id: &str, message: &str) -> Result<()> {
        match self.deps.status.get(job_id).await {
            Ok(record) if record.status.is_terminal() => Ok(()),
            _ => {
                self.deps
                    .status
                    .set(job_id, JobUpdate::failed(message))
                    .await?;
                Ok(())
            }
        }
    }

    /// Remove every scratch path of `job_id`. Never fails.
    pub async fn cleanup_job(&self, job_id: &str) {
        self.cleanup(&JobPaths::new(&self.work_dir, job_id)).await;
    }

    async fn cleanup(&self, paths: &JobPaths) {
        for path in paths.transient_paths() {
            fs::discard_path(&path).await;
        }
    }

    async fn log(&self, job_id: &str, entry: LogEntry) {
        self.deps.status.append_log(job_id, entry).await;
    }

    /// Announce `stage` in the status store.
    async fn enter(
        &self,
        job_id: &str,
        stage: PipelineStage,
        repo_url: &str,
    ) -> std::result::Result<Instant, Interruption> {
        let message = stage.message(repo_url);
        let update = JobUpdate::status(stage.status(), &message).with_repo_url(repo_url);
        self.deps
            .status
            .set(job_id, update)
            .await
            .map_err(Interruption::StatusStore)?;
        self.log(job_id, LogEntry::info(&message)).await;
        Ok(Instant::now())
    }

    async fn finished(&self, job_id: &str, stage: PipelineStage, started: Instant) {
        let ms = started.elapsed().as_millis() as u64;
        self.log(
            job_id,
            LogEntry::info(format!("{} stage finished", stage))
                .with_details(json!({ "duration_ms": ms })),
        )
        .await;
    }

    async fn execute(
        &self,
        paths: &JobPaths,
        repo_url: &str,
    ) -> std::result::Result<String, Interruption> {
        let job_id = paths.job_id();

        let started = self.enter(job_id, PipelineStage::Clone, repo_url).await?;
        let snapshot = clone_stage(self.deps.cloner.as_ref(), paths, repo_url)
            .await
            .map_err(|e| Interruption::Stage(PipelineStage::Clone, e))?;
        self.finished(job_id, PipelineStage::Clone, started).await;

        let started = self.enter(job_id, PipelineStage::Parse, repo_url).await?;
        let inventory = parse_stage(&snapshot)
            .await
            .map_err(|e| Interruption::Stage(PipelineStage::Parse, e))?;
        self.log(
            job_id,
            LogEntry::info(format!("Found {} source files", inventory.files.len()))
                .with_details(json!({ "total_bytes": inventory.total_bytes })),
        )
        .await;
        self.finished(job_id, PipelineStage::Parse, started).await;

        let started = self.enter(job_id, PipelineStage::Analyze, repo_url).await?;
        let analysis = analyze_stage(
            self.deps.analysis.as_ref(),
            job_id,
            &inventory,
            self.analysis_timeout,
        )
        .await;
        if let Some(reason) = &analysis.degraded {
            warn!(job_id = %job_id, "Continuing with placeholder documentation");
            self.log(
                job_id,
                LogEntry::warn("Analysis failed, continuing with placeholder document")
                    .with_details(json!({ "reason": reason })),
            )
            .await;
        }
        self.finished(job_id, PipelineStage::Analyze, started).await;

        let started = self.enter(job_id, PipelineStage::Package, repo_url).await?;
        let artifact = package_stage(paths, &analysis.bundle)
            .await
            .map_err(|e| Interruption::Stage(PipelineStage::Package, e))?;
        self.finished(job_id, PipelineStage::Package, started).await;

        let started = self.enter(job_id, PipelineStage::Upload, repo_url).await?;
        let url = upload_stage(self.deps.storage.as_ref(), job_id, &artifact)
            .await
            .map_err(|e| Interruption::Stage(PipelineStage::Upload, e))?;
        self.finished(job_id, PipelineStage::Upload, started).await;

        Ok(url)
    }
}
