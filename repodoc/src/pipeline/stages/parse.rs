//! Parse stage: inventory of candidate source files in the snapshot.
//!
//! Only paths and sizes are collected; reading and understanding the code is
//! left to the analysis collaborator.

use std::path::{Path, PathBuf};

use super::RepositorySnapshot;
use crate::{Error, Result};

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Extensions considered source or documentation.
const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "h", "md", "rs", "go", "rb", "c", "cs", "kt",
    "swift",
];

/// Candidate files of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInventory {
    /// Snapshot root the paths are relative to.
    pub root: PathBuf,
    /// Relative paths with `/` separators, sorted.
    pub files: Vec<String>,
    pub total_bytes: u64,
}

impl FileInventory {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn visit_dir(base: &Path, dir: &Path, inventory: &mut FileInventory) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io_path("reading directory", dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::io_path("reading directory", dir, e))?;
        let path = entry.path();
        // Symlinks are neither followed nor reported.
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io_path("inspecting", &path, e))?;

        if file_type.is_dir() {
            let skipped = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| SKIP_DIRS.contains(&n));
            if !skipped {
                visit_dir(base, &path, inventory)?;
            }
        } else if file_type.is_file() && is_source_file(&path) {
            let metadata = entry
                .metadata()
                .map_err(|e| Error::io_path("inspecting", &path, e))?;
            if let Ok(rel) = path.strip_prefix(base) {
                inventory
                    .files
                    .push(rel.to_string_lossy().replace('\\', "/"));
                inventory.total_bytes += metadata.len();
            }
        }
    }
    Ok(())
}

/// Walk the snapshot on the blocking pool and collect its source files.
pub async fn parse_stage(snapshot: &RepositorySnapshot) -> Result<FileInventory> {
    let root = snapshot.path.clone();
    let inventory = tokio::task::spawn_blocking(move || {
        let mut inventory = FileInventory {
            root: root.clone(),
            ..Default::default()
        };
        visit_dir(&root, &root, &mut inventory)?;
        inventory.files.sort();
        Ok::<_, Error>(inventory)
    })
    .await
    .map_err(|e| Error::Parse(format!("inventory task failed: {}", e)))?;

    inventory.map_err(|e| match e {
        Error::Parse(msg) => Error::Parse(msg),
        other => Error::Parse(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn collects_sorted_source_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "README.md", "# hi");
        write(dir.path(), "app/view.TSX", "x");
        write(dir.path(), "logo.png", "binary");
        write(dir.path(), "node_modules/dep/index.js", "x");
        write(dir.path(), ".git/config", "x");
        write(dir.path(), "target/debug/build.rs", "x");

        let snapshot = RepositorySnapshot {
            path: dir.path().to_path_buf(),
        };
        let inventory = parse_stage(&snapshot).await.unwrap();

        assert_eq!(inventory.files, ["README.md", "app/view.TSX", "src/main.rs"]);
        assert_eq!(inventory.total_bytes, 12 + 4 + 1);
        assert_eq!(inventory.root, dir.path());
    }

    #[tokio::test]
    async fn empty_snapshot_is_fine() {
        let dir = TempDir::new().unwrap();
        let snapshot = RepositorySnapshot {
            path: dir.path().to_path_buf(),
        };
        assert!(parse_stage(&snapshot).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let snapshot = RepositorySnapshot {
            path: dir.path().join("gone"),
        };
        assert!(matches!(
            parse_stage(&snapshot).await,
            Err(Error::Parse(_))
        ));
    }
}
