//! Artifact storage.
//!
//! A [`StorageBackend`] durably keeps a packaged artifact and hands back a URL
//! clients can fetch it from. Which backend a process uses is fixed at
//! startup by [`StorageMode`].

pub mod local;
pub mod s3;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::Result;
use crate::config::StorageMode;

pub use local::{FILES_ROUTE, LocalStorage};
pub use s3::S3Storage;

/// Persist an artifact and return its retrieval URL.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store the artifact at `artifact` for `job_id`.
    ///
    /// The artifact file may be consumed (moved) by the backend.
    async fn store(&self, artifact: &Path, job_id: &str) -> Result<String>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Build the backend selected by `mode`.
pub fn from_mode(mode: &StorageMode) -> Arc<dyn StorageBackend> {
    match mode {
        StorageMode::ObjectStorage(settings) => Arc::new(S3Storage::new(settings)),
        StorageMode::LocalDisk(settings) => Arc::new(LocalStorage::new(settings)),
    }
}
