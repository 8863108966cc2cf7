//! packline-ci: the Comic Reader packaging pipeline
//!
//! Plans the five packaging stages, executes them in order against a
//! per-run workspace, records every step in a [`packline_core::RunLedger`],
//! and re-derives a verdict from the recorded events.

pub mod cancel;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod runner;
pub mod spec;
pub mod stage;
pub mod state;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use error::StageError;
pub use gate::{GateVerdict, RunGate};
pub use pipeline::{PackagingPipeline, PipelineResult};
pub use runner::{
    CommandOutput, CommandRunner, LocalExecutor, StageContext, StageExecutor, StageResult,
};
pub use spec::PipelineSpec;
pub use stage::{
    plan_stages, FailureKind, StageAction, StageConfig, StageKind, ARTIFACT_NAME, PIPELINE_NAME,
};
pub use state::PipelineState;
