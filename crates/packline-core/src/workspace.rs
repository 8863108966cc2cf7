//! Ephemeral per-run workspace.
//!
//! ```text
//! <root>/
//!   src/     checked-out revision
//!   .venv/   provisioned interpreter environment
//! ```
//!
//! The directory is removed when the [`Workspace`] is dropped unless it is
//! explicitly kept with [`Workspace::keep`].

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{PacklineError, Result};

const PREFIX: &str = "packline-ws-";

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under the system temp directory.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir()
            .map_err(|e| PacklineError::Workspace(format!("failed to create workspace: {e}")))?;
        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    /// Create a workspace under `parent`, creating `parent` if needed.
    pub fn create_in(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .map_err(|e| {
                PacklineError::Workspace(format!(
                    "failed to create workspace in {}: {e}",
                    parent.display()
                ))
            })?;
        debug!(path = %dir.path().display(), "workspace created");
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Checkout destination.
    pub fn source_dir(&self) -> PathBuf {
        self.root().join("src")
    }

    /// Interpreter environment directory.
    pub fn venv_dir(&self) -> PathBuf {
        self.root().join(".venv")
    }

    /// Interpreter inside the provisioned environment.
    pub fn venv_python(&self) -> PathBuf {
        venv_python(&self.venv_dir())
    }

    /// Persist the directory past the end of the run and return its path.
    pub fn keep(self) -> PathBuf {
        let path = self.dir.keep();
        info!(path = %path.display(), "workspace kept");
        path
    }

    /// Remove the directory now, reporting any failure.
    pub fn dispose(self) -> Result<()> {
        let path = self.root().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!(path = %path.display(), error = %e, "workspace cleanup failed");
            PacklineError::Workspace(format!("failed to remove {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "workspace removed");
        Ok(())
    }
}

/// Interpreter path inside a virtual environment at `venv`.
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}
