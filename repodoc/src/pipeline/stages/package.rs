//! Package stage: write documents to disk and archive them.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::JobPaths;
use crate::analysis::DocumentBundle;
use crate::utils::filename::{sanitize_document_name, with_collision_suffix};
use crate::utils::fs;
use crate::{Error, Result};

/// The archive produced for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    /// File names inside the archive, in write order.
    pub entries: Vec<String>,
    pub size_bytes: u64,
}

fn packaging_error(e: Error) -> Error {
    match e {
        Error::Packaging(msg) => Error::Packaging(msg),
        other => Error::Packaging(other.to_string()),
    }
}

/// Assign every document a unique, flat file name.
fn assign_file_names(bundle: &DocumentBundle) -> Vec<(String, &str)> {
    let mut taken = HashSet::new();
    let mut files = Vec::with_capacity(bundle.len());

    for (name, body) in bundle.iter() {
        let base = sanitize_document_name(name);
        let mut candidate = base.clone();
        let mut n = 2;
        while !taken.insert(candidate.to_ascii_lowercase()) {
            candidate = with_collision_suffix(&base, n);
            n += 1;
        }
        if candidate != name {
            debug!(original = %name, file = %candidate, "Renamed document");
        }
        files.push((candidate, body));
    }
    files
}

fn write_archive(site_dir: &Path, entries: &[String], archive_path: &Path) -> Result<u64> {
    let file =
        File::create(archive_path).map_err(|e| Error::io_path("creating", archive_path, e))?;
    let mut zip = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        let source = site_dir.join(entry);
        let data = std::fs::read(&source).map_err(|e| Error::io_path("reading", &source, e))?;
        zip.start_file(entry.as_str(), options)
            .map_err(|e| Error::Packaging(format!("Failed to start ZIP entry {}: {}", entry, e)))?;
        zip.write_all(&data)
            .map_err(|e| Error::io_path("writing", archive_path, e))?;
    }

    let file = zip
        .finish()
        .map_err(|e| Error::Packaging(format!("Failed to finalize ZIP archive: {}", e)))?;
    let size = file
        .metadata()
        .map_err(|e| Error::io_path("inspecting", archive_path, e))?
        .len();
    Ok(size)
}

/// Materialize `bundle` under the job's site directory and zip it.
pub async fn package_stage(paths: &JobPaths, bundle: &DocumentBundle) -> Result<PackagedArtifact> {
    let site_dir = paths.site_dir();
    let archive_path = paths.archive_path();

    // Leftovers from an earlier delivery of the same job.
    fs::remove_dir_all_if_exists(&site_dir)
        .await
        .map_err(packaging_error)?;
    fs::remove_file_if_exists(&archive_path)
        .await
        .map_err(packaging_error)?;
    fs::ensure_dir_all_with_op("creating site directory", &site_dir)
        .await
        .map_err(packaging_error)?;

    let files = assign_file_names(bundle);
    let mut entries = Vec::with_capacity(files.len());
    for (file_name, body) in files {
        let target = site_dir.join(&file_name);
        tokio::fs::write(&target, body)
            .await
            .map_err(|e| packaging_error(Error::io_path("writing", &target, e)))?;
        entries.push(file_name);
    }

    let size_bytes = {
        let site_dir = site_dir.clone();
        let archive_path = archive_path.clone();
        let entries = entries.clone();
        tokio::task::spawn_blocking(move || write_archive(&site_dir, &entries, &archive_path))
            .await
            .map_err(|e| Error::Packaging(format!("archive task failed: {}", e)))?
            .map_err(packaging_error)?
    };

    info!(
        job_id = %paths.job_id(),
        documents = entries.len(),
        size_bytes,
        "Packaged documentation"
    );

    Ok(PackagedArtifact {
        path: archive_path,
        entries,
        size_bytes,
    })
}
