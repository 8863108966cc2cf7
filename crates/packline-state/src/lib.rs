//! packline-state: SurrealDB backend for packline
//!
//! Persistence layer for pipeline runs and published artifacts.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `RunLedger`: ordered run events and terminal run summaries
//! - `ArtifactRegistry`: records of published artifacts and their retention
//! - `SurrealRunLedger` / `SurrealArtifactRegistry`: SurrealDB backends
//! - `fakes`: in-memory implementations for tests

pub mod connection;
mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_artifacts;
pub mod surreal_ledger;

pub use connection::{connect, connect_in_memory, connect_local};
pub use error::{StateError, StorageError};
pub use storage_traits::{
    ArtifactRecord, ArtifactRegistry, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata,
    RunRecord, RunStatus, RunSummary, StorageResult,
};
pub use surreal_artifacts::SurrealArtifactRegistry;
pub use surreal_ledger::SurrealRunLedger;

/// Result type for packline-state operations
pub type Result<T> = std::result::Result<T, StateError>;
