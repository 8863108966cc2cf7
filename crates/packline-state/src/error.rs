//! Error types for packline-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the state database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits (`RunLedger`, `ArtifactRegistry`)
#[derive(Error, Debug)]
pub enum StorageError {
    /// The run does not exist
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The run is not in the state the operation requires
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// An event was appended out of order
    #[error("run {run_id}: event seq {seq} is not after {last}")]
    OutOfOrderEvent { run_id: String, seq: u64, last: u64 },

    /// A digest string was not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// No artifact registered under (name, run)
    #[error("artifact not found: {name} (run {run_id})")]
    ArtifactNotFound { name: String, run_id: String },

    /// An artifact with the same (name, run) was already registered
    #[error("artifact already registered: {name} (run {run_id})")]
    DuplicateArtifact { name: String, run_id: String },

    /// Backend failure (query error, decode error, ...)
    #[error("storage backend error: {0}")]
    Backend(String),
}
