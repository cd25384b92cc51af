//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! make job-scoped cleanup tolerant of paths that are already gone.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    ensure_dir_all_with_op("creating directory", path).await
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove a directory tree. A missing directory is not an error.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing directory", path, e)),
    }
}

/// Remove a file. A missing file is not an error.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Best-effort removal of a job-scoped path; failures are logged and dropped.
pub async fn discard_path(path: &Path) {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => remove_dir_all_if_exists(path).await,
        Ok(_) => remove_file_if_exists(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => Err(io_error("inspecting path", path, e)),
    };

    match result {
        Ok(()) => debug!(path = %path.display(), "Removed job scratch path"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove job scratch path"),
    }
}

/// Move a file, falling back to copy + remove when `rename` crosses filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to)
        .await
        .map_err(|e| io_error("copying file", from, e))?;
    remove_file_if_exists(from).await
}
