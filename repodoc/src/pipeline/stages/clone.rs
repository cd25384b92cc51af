//! Clone stage: fetch the source repository into a job-scoped directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::JobPaths;
use crate::utils::fs;
use crate::{Error, Result};

/// Local copy of the source repository, owned by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    pub path: PathBuf,
}

/// Source-control clone operation.
#[async_trait]
pub trait RepositoryCloner: Send + Sync {
    /// Clone `url` into `dest`, which does not exist yet.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Clones with the `git` binary (shallow, no prompts).
#[derive(Debug, Clone)]
pub struct GitCloner {
    timeout: Option<Duration>,
}

impl GitCloner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl RepositoryCloner for GitCloner {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let mut cmd = process_utils::tokio_command("git");
        cmd.args(["clone", "--depth", "1", "--quiet", "--", url])
            .arg(dest)
            // Never block on a credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");

        process_utils::run_captured(cmd, self.timeout)
            .await
            .map_err(|e| Error::Clone(e.to_string()))?;
        Ok(())
    }
}

/// Remove any stale snapshot for this job, then clone into a fresh one.
pub async fn clone_stage(
    cloner: &dyn RepositoryCloner,
    paths: &JobPaths,
    repo_url: &str,
) -> Result<RepositorySnapshot> {
    let dest = paths.snapshot_dir();

    // A redelivered task finds the previous attempt's directory here.
    fs::remove_dir_all_if_exists(&dest)
        .await
        .map_err(|e| Error::Clone(e.to_string()))?;
    fs::ensure_parent_dir(&dest)
        .await
        .map_err(|e| Error::Clone(e.to_string()))?;

    debug!(job_id = %paths.job_id(), dest = %dest.display(), "Cloning repository");
    cloner
        .clone_repo(repo_url, &dest)
        .await
        .map_err(|e| match e {
            Error::Clone(msg) => Error::Clone(msg),
            other => Error::Clone(other.to_string()),
        })?;

    info!(job_id = %paths.job_id(), "Cloned {}", repo_url);
    Ok(RepositorySnapshot { path: dest })
}
