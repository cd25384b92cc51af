//! Local-disk storage served by the API under [`FILES_ROUTE`].
//!
//! Artifacts live only as long as the filesystem does; on ephemeral hosts
//! they disappear on restart.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use super::StorageBackend;
use crate::config::LocalSettings;
use crate::pipeline::stages::artifact_file_name;
use crate::utils::fs;
use crate::{Error, Result};

/// Route prefix the API serves the storage directory under.
pub const FILES_ROUTE: &str = "/files";

/// Moves artifacts into a directory and links to them via the API.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    storage_dir: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(settings: &LocalSettings) -> Self {
        Self {
            storage_dir: settings.storage_dir.clone(),
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Public URL of a stored file.
    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}{}/{}", self.public_base_url, FILES_ROUTE, file_name)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn store(&self, artifact: &Path, job_id: &str) -> Result<String> {
        let file_name = artifact_file_name(job_id);
        let target = self.storage_dir.join(&file_name);

        fs::ensure_dir_all_with_op("creating storage directory", &self.storage_dir)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;
        fs::move_file(artifact, &target)
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;

        info!(job_id = %job_id, path = %target.display(), "Stored artifact locally");
        Ok(self.url_for(&file_name))
    }

    fn name(&self) -> &'static str {
        "local-disk"
    }
}
