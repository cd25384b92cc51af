//! The five pipeline stages.
//!
//! Each stage is a plain async function of the job's scratch paths and the
//! previous stage's output. Status reporting is the orchestrator's job; the
//! stages only do the work and return typed errors.

pub mod analyze;
pub mod clone;
pub mod package;
pub mod parse;
pub mod upload;

use std::path::{Path, PathBuf};

use crate::database::models::JobStatus;

pub use analyze::{AnalysisOutcome, DEGRADED_DOCUMENT_NAME, analyze_stage, degraded_bundle};
pub use clone::{GitCloner, RepositoryCloner, RepositorySnapshot, clone_stage};
pub use package::{PackagedArtifact, package_stage};
pub use parse::{FileInventory, parse_stage};
pub use upload::upload_stage;

/// Stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PipelineStage {
    Clone,
    Parse,
    Analyze,
    Package,
    Upload,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        Self::Clone,
        Self::Parse,
        Self::Analyze,
        Self::Package,
        Self::Upload,
    ];

    /// Status a job reports while this stage runs.
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Clone => JobStatus::Cloning,
            Self::Parse => JobStatus::Parsing,
            Self::Analyze => JobStatus::Generating,
            Self::Package => JobStatus::Building,
            Self::Upload => JobStatus::Uploading,
        }
    }

    /// Human-readable status message shown while this stage runs.
    pub fn message(&self, repo_url: &str) -> String {
        match self {
            Self::Clone => format!("Cloning {}...", repo_url),
            Self::Parse => "Reading file structure...".to_string(),
            Self::Analyze => "AI Agent is analyzing code...".to_string(),
            Self::Package => "Building documentation site...".to_string(),
            Self::Upload => "Finalizing documentation...".to_string(),
        }
    }
}

/// Scratch locations owned by one job. Keyed by job id so concurrent jobs
/// never share a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    job_id: String,
    work_dir: PathBuf,
}

impl JobPaths {
    pub fn new(work_dir: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// `<work>/repos/<job_id>`
    pub fn snapshot_dir(&self) -> PathBuf {
        self.work_dir.join("repos").join(&self.job_id)
    }

    /// `<work>/docs_site_<job_id>`
    pub fn site_dir(&self) -> PathBuf {
        self.work_dir.join(format!("docs_site_{}", self.job_id))
    }

    /// `<work>/docs_<job_id>.zip`
    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(artifact_file_name(&self.job_id))
    }

    /// Everything a finished run must remove.
    pub fn transient_paths(&self) -> [PathBuf; 3] {
        [self.snapshot_dir(), self.site_dir(), self.archive_path()]
    }
}

/// Deterministic artifact file name (and object key) for a job.
pub fn artifact_file_name(job_id: &str) -> String {
    format!("docs_{}.zip", job_id)
}
