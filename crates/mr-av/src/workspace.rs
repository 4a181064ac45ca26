//! Per-job workspace management.
//!
//! A [`Workspace`] is a private temporary directory that exists for exactly
//! the lifetime of one job. The tool writes its output there; on success the
//! artifact is moved out with [`Workspace::persist_output`]. The directory is
//! removed when the workspace is dropped, whatever the outcome.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Base name of the output file inside the workspace.
const OUTPUT_STEM: &str = "output";

/// Temporary directory owned by a single job.
///
/// # Example
///
/// ```no_run
/// use mr_av::Workspace;
///
/// let workspace = Workspace::new(None).unwrap();
/// let output = workspace.output("mp4");
/// // ... run the tool, writing to `output` ...
/// workspace.persist_output("mp4", std::path::Path::new("/srv/artifacts/job.mp4")).unwrap();
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a new workspace under `root` (or the system temp dir).
    pub fn new(root: Option<&Path>) -> mr_core::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mr-job-");
        let temp_dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| mr_core::Error::Internal(format!("failed to create workspace: {e}")))?;

        Ok(Self { temp_dir })
    }

    /// Path to the workspace directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where the tool should write its output for the given extension.
    pub fn output(&self, ext: &str) -> PathBuf {
        self.temp_dir.path().join(format!("{OUTPUT_STEM}.{ext}"))
    }

    /// Move the output file to `dest` and return its size in bytes.
    ///
    /// Tries a rename first (same filesystem) and falls back to copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the output file does not exist or cannot be moved.
    pub fn persist_output(&self, ext: &str, dest: &Path) -> mr_core::Result<u64> {
        let output = self.output(ext);

        let metadata = std::fs::metadata(&output).map_err(|_| {
            mr_core::Error::Internal(format!(
                "tool exited successfully but wrote no output file ({OUTPUT_STEM}.{ext})"
            ))
        })?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if std::fs::rename(&output, dest).is_err() {
            std::fs::copy(&output, dest)?;
            let _ = std::fs::remove_file(&output);
        }

        Ok(metadata.len())
    }
}
