//! Upload stage: hand the artifact to the storage backend.

use tracing::debug;

use super::PackagedArtifact;
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// Store the artifact and return its retrieval URL.
pub async fn upload_stage(
    storage: &dyn StorageBackend,
    job_id: &str,
    artifact: &PackagedArtifact,
) -> Result<String> {
    debug!(job_id = %job_id, backend = storage.name(), "Uploading artifact");
    let url = storage
        .store(&artifact.path, job_id)
        .await
        .map_err(|e| match e {
            Error::Upload(msg) => Error::Upload(msg),
            other => Error::Upload(other.to_string()),
        })?;

    if url.is_empty() {
        return Err(Error::Upload(format!(
            "{} returned an empty URL",
            storage.name()
        )));
    }
    Ok(url)
}
