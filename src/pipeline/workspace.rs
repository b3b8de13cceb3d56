//! Per-run working storage for intermediate artifacts.
//!
//! pdfium and calamine both open documents from a file-system path, and
//! rendered pages must be addressable so they can be re-read for the model
//! call and shown next to their results. All of that lives in one
//! [`ArtifactDir`] owned by the batch. It is backed by a [`TempDir`], so the
//! directory and everything in it is removed when the value is dropped:
//! on success, on a unit-level failure, on an early `?` return, or during a
//! panic unwind.

use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;

/// Scoped directory holding rendered pages and temporary document copies.
#[derive(Debug)]
pub struct ArtifactDir {
    dir: TempDir,
}

impl ArtifactDir {
    /// Create a fresh artifact directory under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>) -> Result<Self, ExtractError> {
        let builder_prefix = "fin2json-";
        let result = match parent {
            Some(p) => {
                std::fs::create_dir_all(p).map_err(|e| ExtractError::WorkspaceSetup {
                    path: p.to_path_buf(),
                    source: e,
                })?;
                tempfile::Builder::new().prefix(builder_prefix).tempdir_in(p)
            }
            None => tempfile::Builder::new().prefix(builder_prefix).tempdir(),
        };

        let dir = result.map_err(|e| ExtractError::WorkspaceSetup {
            path: parent
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir),
            source: e,
        })?;
        debug!("Artifact directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A collision-free path for a new artifact: `<stem>_<uuid>.<ext>`.
    pub fn unique_path(&self, stem: &str, ext: &str) -> PathBuf {
        let id = Uuid::new_v4().simple();
        self.dir.path().join(format!("{stem}_{id}.{ext}"))
    }

    /// Write a temporary copy of an uploaded document and return its path.
    pub async fn write_document_copy(
        &self,
        file: usize,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ExtractError> {
        let path = self.unique_path(&format!("temp_{file}"), ext);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ExtractError::WorkspaceSetup {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    /// Remove the directory now and report failures, instead of the silent
    /// best-effort removal on drop.
    pub fn close(self) -> Result<(), ExtractError> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| ExtractError::WorkspaceSetup { path, source: e })
    }
}
