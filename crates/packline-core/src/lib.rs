//! packline core library
//!
//! Building blocks shared by the pipeline engine and the CLI:
//!
//! - `cas`: content-addressed blob store
//! - `artifact`: artifact manifests and stores (local, HTTP)
//! - `workspace`: ephemeral per-run directories
//! - `trigger` / `git`: which events start a run, and at which revision
//! - `config`: TOML configuration with environment overrides
//! - `recording` / `obs` / `telemetry`: run ledger recording and tracing

pub mod artifact;
pub mod cas;
pub mod config;
pub mod error;
pub mod git;
pub mod obs;
pub mod recording;
pub mod telemetry;
pub mod trigger;
pub mod workspace;

pub use artifact::{
    ArtifactError, ArtifactManifest, ArtifactStore, HttpArtifactStore, LocalArtifactStore,
    ManifestEntry, PruneReport,
};
pub use cas::fs::FsCasStore;
pub use cas::{CasError, CasStore, Digest};
pub use config::PacklineConfig;
pub use error::{PacklineError, Result};
pub use git::resolve_branch_head;
pub use recording::RunRecorder;
pub use telemetry::init_tracing;
pub use trigger::{GitResolver, RevisionResolver, RunRequest, Trigger, TriggerPolicy};
pub use workspace::Workspace;

pub use packline_state::{
    ArtifactRecord, ArtifactRegistry, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata,
    RunRecord, RunStatus, RunSummary,
};
