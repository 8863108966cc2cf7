//! Artifact publication and retrieval.
//!
//! A published artifact is a directory tree turned into an [`ArtifactManifest`]:
//! every regular file, keyed by its `/`-separated relative path, with the
//! SHA-256 of its contents. File blobs and the serialized manifest live in an
//! [`ArtifactStore`]; the store hands back an [`ArtifactRecord`] which is the
//! retrievable reference to the artifact.

pub mod http;
pub mod local;

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use packline_state::{ArtifactRecord, RunId, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::cas::{CasError, Digest};

pub use http::HttpArtifactStore;
pub use local::LocalArtifactStore;

/// Errors from artifact upload, retrieval and retention.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact path does not exist: {0}")]
    MissingPath(PathBuf),

    #[error("artifact path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("artifact directory is empty: {0}")]
    EmptyArtifact(PathBuf),

    #[error("blob store error: {0}")]
    Cas(#[from] CasError),

    #[error("artifact registry error: {0}")]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("corrupt blob for {path}: expected {expected}, got {actual}")]
    Corrupt {
        path: String,
        expected: Digest,
        actual: Digest,
    },

    #[error("manifest entry escapes the destination: {0}")]
    UnsafePath(String),

    #[error("symlink resolves outside the artifact directory: {0}")]
    LinkEscapesRoot(PathBuf),

    #[error("symlink cannot be resolved: {0}")]
    BrokenLink(PathBuf),

    #[error("file name is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("duplicate manifest path: {0}")]
    DuplicatePath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for ArtifactError {
    fn from(err: reqwest::Error) -> Self {
        ArtifactError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// One file in a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path inside the artifact, `/`-separated.
    pub path: String,
    pub digest: Digest,
    pub size: u64,
    pub executable: bool,
}

/// Content listing of a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    /// Sorted by `path`.
    pub entries: Vec<ManifestEntry>,
    /// SHA-256 over the sorted relative paths only.
    pub layout_digest: Digest,
}

impl ArtifactManifest {
    /// Build a manifest, sorting entries and deriving the layout digest.
    pub fn new(name: impl Into<String>, mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let layout_digest = layout_digest(entries.iter().map(|e| e.path.as_str()));
        Self {
            name: name.into(),
            entries,
            layout_digest,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Serialize to the bytes that are stored and addressed by digest.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// File blobs referenced by this manifest.
    pub fn blob_digests(&self) -> BTreeSet<Digest> {
        self.entries.iter().map(|e| e.digest).collect()
    }

    /// Build the registry record for this manifest.
    pub fn record(
        &self,
        run_id: &RunId,
        manifest_digest: Digest,
        created_at: DateTime<Utc>,
        retention: Option<Duration>,
    ) -> ArtifactRecord {
        ArtifactRecord {
            name: self.name.clone(),
            run_id: run_id.clone(),
            manifest_digest: manifest_digest.into(),
            layout_digest: self.layout_digest.into(),
            file_count: self.entries.len() as u64,
            total_bytes: self.total_bytes(),
            created_at,
            expires_at: retention.map(|r| created_at + r),
        }
    }
}

/// Digest over an ordered list of relative paths.
pub fn layout_digest<'a>(paths: impl IntoIterator<Item = &'a str>) -> Digest {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Digest::from(bytes)
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<ArtifactRecord>,
    pub blobs_deleted: usize,
}

/// A regular file found under an artifact directory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub executable: bool,
}

/// Collect the regular files under `root`, sorted by relative path.
///
/// Symlinks are followed and stored as the files they point at, as long as
/// they resolve inside `root`. A link that escapes `root` or dangles fails
/// the walk, as does a file name that is not valid UTF-8.
///
/// Fails when `root` is missing, is not a directory, or holds no files.
pub fn collect_files(root: &Path) -> Result<Vec<SourceFile>> {
    if !root.exists() {
        return Err(ArtifactError::MissingPath(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ArtifactError::NotADirectory(root.to_path_buf()));
    }
    let canonical_root = root.canonicalize()?;

    let mut files = Vec::new();
    let mut seen = HashSet::new();
    for entry in walkdir::WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(walk_error)?;
        if entry.path_is_symlink() && entry.depth() > 0 {
            let target = entry
                .path()
                .canonicalize()
                .map_err(|_| ArtifactError::BrokenLink(entry.path().to_path_buf()))?;
            if !target.starts_with(&canonical_root) {
                return Err(ArtifactError::LinkEscapesRoot(entry.path().to_path_buf()));
            }
            debug!(path = %entry.path().display(), target = %target.display(), "following symlink in artifact");
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ArtifactError::NonUtf8Path(entry.path().to_path_buf()))?
            .join("/");
        if !seen.insert(rel_path.clone()) {
            return Err(ArtifactError::DuplicatePath(rel_path));
        }
        let metadata = entry.metadata().map_err(walk_error)?;
        files.push(SourceFile {
            rel_path,
            abs_path: entry.path().to_path_buf(),
            executable: is_executable(&metadata),
        });
    }

    if files.is_empty() {
        return Err(ArtifactError::EmptyArtifact(root.to_path_buf()));
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

fn walk_error(err: walkdir::Error) -> ArtifactError {
    let dangling = err
        .path()
        .filter(|p| p.symlink_metadata().is_ok_and(|m| m.file_type().is_symlink()))
        .filter(|p| !p.exists())
        .map(Path::to_path_buf);
    if let Some(path) = dangling {
        return ArtifactError::BrokenLink(path);
    }
    if let Some(ancestor) = err.loop_ancestor() {
        return ArtifactError::Io(std::io::Error::other(format!(
            "symlink loop back to {}",
            ancestor.display()
        )));
    }
    ArtifactError::Io(
        err.into_io_error()
            .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
    )
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Resolve a manifest path under `dest`, rejecting anything that is not a
/// plain relative path.
pub(crate) fn restore_path(dest: &Path, rel_path: &str) -> Result<PathBuf> {
    let rel = Path::new(rel_path);
    if rel_path.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ArtifactError::UnsafePath(rel_path.to_string()));
    }
    Ok(dest.join(rel))
}

/// Write one restored file, verifying its digest first.
pub(crate) fn restore_file(dest: &Path, entry: &ManifestEntry, bytes: &[u8]) -> Result<()> {
    let actual = Digest::compute(bytes);
    if actual != entry.digest {
        return Err(ArtifactError::Corrupt {
            path: entry.path.clone(),
            expected: entry.digest,
            actual,
        });
    }
    let target = restore_path(dest, &entry.path)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, bytes)?;
    #[cfg(unix)]
    if entry.executable {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Artifact store: retains uploaded build artifacts for later retrieval.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload the directory at `source` under `name` for `run_id`.
    async fn upload(&self, name: &str, run_id: &RunId, source: &Path) -> Result<ArtifactRecord>;

    /// Restore the artifact referenced by `record` into `dest`.
    async fn fetch(&self, record: &ArtifactRecord, dest: &Path) -> Result<ArtifactManifest>;

    /// List artifact records, newest first, optionally filtered by name.
    async fn list(&self, name: Option<&str>) -> Result<Vec<ArtifactRecord>>;

    /// Look up the artifact `name` produced by `run_id`.
    async fn find(&self, name: &str, run_id: &RunId) -> Result<ArtifactRecord>;

    /// Drop artifacts whose retention lapsed at `now`.
    async fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport>;
}
