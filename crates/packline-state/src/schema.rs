//! SurrealDB row types for runs, run events and artifacts.
//!
//! These mirror the tables created in [`crate::migrations`] and are converted
//! to and from the `storage_traits` types at the backend boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `DateTime<Utc>` stored as a native SurrealDB datetime.
mod surreal_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use surrealdb::sql::Datetime;

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        Datetime::from(*at).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        Datetime::deserialize(d).map(DateTime::from)
    }

    /// Same, for optional timestamps.
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            at.map(Datetime::from).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Ok(Option::<Datetime>::deserialize(d)?.map(DateTime::from))
        }
    }
}

/// Run record - one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Unique run ID (UUID string)
    pub run_id: String,
    /// Pipeline spec digest (SHA256)
    pub spec_digest: String,
    /// Revision the run is bound to
    pub revision: Option<String>,
    /// Pipeline name
    pub pipeline: String,
    /// Arbitrary tags (JSON)
    pub tags: serde_json::Value,
    /// Run status: "running" | "completed" | "failed" | "cancelled"
    pub status: String,
    /// Total events recorded
    pub total_events: u64,
    /// Manifest digest of the published artifact
    pub artifact_digest: Option<String>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether run succeeded
    pub success: bool,
    /// Created timestamp
    #[serde(with = "surreal_time")]
    pub created_at: DateTime<Utc>,
    /// Completed timestamp (if terminal)
    #[serde(default, with = "surreal_time::option")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    /// Create a new run row in "running" state
    pub fn new(
        run_id: String,
        spec_digest: String,
        revision: Option<String>,
        pipeline: String,
        tags: serde_json::Value,
    ) -> Self {
        RunRow {
            id: None,
            run_id,
            spec_digest,
            revision,
            pipeline,
            tags,
            status: "running".to_string(),
            total_events: 0,
            artifact_digest: None,
            duration_ms: 0,
            success: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move the row into a terminal status
    pub fn finish(
        mut self,
        status: &str,
        total_events: u64,
        artifact_digest: Option<String>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        self.status = status.to_string();
        self.total_events = total_events;
        self.artifact_digest = artifact_digest;
        self.duration_ms = duration_ms;
        self.success = success;
        self.completed_at = Some(Utc::now());
        self
    }
}

/// Run event row - single event in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Run ID this event belongs to
    pub run_id: String,
    /// Monotonic sequence number within run (1-indexed)
    pub seq: u64,
    /// Event kind
    pub kind: String,
    /// Event payload (JSON)
    pub payload: serde_json::Value,
    /// Event timestamp
    #[serde(with = "surreal_time")]
    pub timestamp: DateTime<Utc>,
}

impl RunEventRow {
    pub fn new(
        run_id: String,
        seq: u64,
        kind: String,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        RunEventRow {
            id: None,
            run_id,
            seq,
            kind,
            payload,
            timestamp,
        }
    }
}

/// Artifact row - one published artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub name: String,
    pub run_id: String,
    pub manifest_digest: String,
    pub layout_digest: String,
    pub file_count: u64,
    pub total_bytes: u64,
    #[serde(with = "surreal_time")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_time::option")]
    pub expires_at: Option<DateTime<Utc>>,
}
