//! Storage trait definitions for packline
//!
//! These traits define the persistence abstractions used by the pipeline:
//! - `RunLedger`: pipeline run persistence (events, summaries)
//! - `ArtifactRegistry`: published artifact records (name + run → manifest)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Wrap an already computed SHA-256 hash.
    pub fn from_hash(hash: &[u8; 32]) -> Self {
        ContentDigest(hex::encode(hash))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RunLedger: pipeline run persistence
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Repository revision the run is bound to
    pub revision: Option<String>,
    /// Pipeline name (e.g. "comic-reader-windows")
    pub pipeline: String,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run (1-indexed)
    pub seq: u64,
    /// Event kind (e.g. "run_triggered", "stage_started", "stage_failed")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Summary produced when a run reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total events recorded
    pub total_events: u64,
    /// Manifest digest of the published artifact, if any
    pub artifact_digest: Option<ContentDigest>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the run succeeded
    pub success: bool,
}

/// Status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Lowercase storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(StorageError::Backend(format!("unknown run status: {other}"))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub spec_digest: ContentDigest,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - Events are ordered by monotonic `seq` within a run.
/// - A run transitions: Running → Completed | Failed | Cancelled (terminal).
/// - Terminal runs are immutable.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new run, returning its unique ID.
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId>;

    /// Append an event to an active run. Fails if the run is terminal or the
    /// event's `seq` does not follow the last recorded one.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Mark a run as completed with a summary.
    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as failed with a summary.
    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as cancelled.
    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs (newest first), optionally filtered by spec digest.
    async fn list_runs(&self, spec_digest: Option<&ContentDigest>)
        -> StorageResult<Vec<RunRecord>>;
}

// ---------------------------------------------------------------------------
// ArtifactRegistry: published artifact records
// ---------------------------------------------------------------------------

/// Reference to a published build artifact.
///
/// The record is what the artifact store hands back to the operator; the
/// artifact's files live in the store under `manifest_digest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact name (e.g. "Comic Reader Windows")
    pub name: String,
    /// Run that produced the artifact
    pub run_id: RunId,
    /// Digest of the serialized manifest
    pub manifest_digest: ContentDigest,
    /// Digest over the artifact's sorted relative paths
    pub layout_digest: ContentDigest,
    /// Number of files in the artifact
    pub file_count: u64,
    /// Sum of file sizes in bytes
    pub total_bytes: u64,
    /// When the artifact was published
    pub created_at: DateTime<Utc>,
    /// When the artifact stops being retained (None = forever)
    pub expires_at: Option<DateTime<Utc>>,
}

impl ArtifactRecord {
    /// Whether retention for this artifact has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Registry of published artifacts.
///
/// Semantics:
/// - `(name, run_id)` identifies an artifact; registering it twice fails.
/// - `list` returns newest first.
/// - `remove` is a no-op for unknown artifacts.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Register a newly published artifact.
    async fn register(&self, record: ArtifactRecord) -> StorageResult<()>;

    /// Look up an artifact by name and producing run.
    async fn get(&self, name: &str, run_id: &RunId) -> StorageResult<ArtifactRecord>;

    /// List artifacts, optionally filtered by name.
    async fn list(&self, name: Option<&str>) -> StorageResult<Vec<ArtifactRecord>>;

    /// Remove an artifact record.
    async fn remove(&self, name: &str, run_id: &RunId) -> StorageResult<()>;

    /// All artifacts whose retention has lapsed at `now`.
    async fn expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<ArtifactRecord>> {
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .filter(|r| r.is_expired(now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn content_digest_rejects_short_hex() {
        assert!(ContentDigest::try_from("abcd".to_string()).is_err());
    }

    #[test]
    fn content_digest_normalizes_case() {
        let upper = "A".repeat(64);
        let digest = ContentDigest::try_from(upper).unwrap();
        assert_eq!(digest.as_str(), "a".repeat(64));
    }

    #[test]
    fn run_status_round_trips_through_str() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn artifact_expiry() {
        let now = Utc::now();
        let mut record = ArtifactRecord {
            name: "a".to_string(),
            run_id: RunId::new(),
            manifest_digest: ContentDigest::from_bytes(b"m"),
            layout_digest: ContentDigest::from_bytes(b"l"),
            file_count: 1,
            total_bytes: 1,
            created_at: now,
            expires_at: None,
        };
        assert!(!record.is_expired(now + Duration::days(10_000)));

        record.expires_at = Some(now + Duration::days(1));
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::days(2)));
    }
}
