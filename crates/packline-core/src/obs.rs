//! Structured observability hooks for pipeline run lifecycle events.
//!
//! - `RunSpan` enters a run-scoped tracing span for the duration of a run
//! - `emit_*` functions log the key lifecycle events with a stable `event` field
//!
//! Filter with `RUST_LOG`; pass `--json` to the CLI for machine-readable lines.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span.
///
/// ```ignore
/// let _span = RunSpan::enter("3f2c...");
/// // every log line in scope carries run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("packline.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: run started for a revision.
pub fn emit_run_started(run_id: &str, pipeline: &str, revision: Option<&str>) {
    info!(
        event = "run.started",
        run_id = %run_id,
        pipeline = %pipeline,
        revision = revision.unwrap_or("-"),
    );
}

/// Emit event: a single event appended to the run.
pub fn emit_event_appended(run_id: &str, event_kind: &str, seq: u64) {
    info!(event = "run.event_appended", run_id = %run_id, kind = %event_kind, seq = seq);
}

/// Emit event: a stage finished.
pub fn emit_stage_finished(run_id: &str, stage: &str, success: bool, duration_ms: u64) {
    if success {
        info!(event = "stage.finished", run_id = %run_id, stage = %stage, success, duration_ms);
    } else {
        warn!(event = "stage.finished", run_id = %run_id, stage = %stage, success, duration_ms);
    }
}

/// Emit event: run reached a terminal status.
pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64, total_events: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
        total_events = total_events,
    );
}

/// Emit event: an artifact was published.
pub fn emit_artifact_published(run_id: &str, name: &str, manifest_digest: &str, files: u64) {
    info!(
        event = "artifact.published",
        run_id = %run_id,
        artifact = %name,
        manifest = %manifest_digest,
        files = files,
    );
}

/// Emit event: run gate evaluated.
pub fn emit_gate_evaluated(run_id: &str, passed: bool, violations: usize) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        passed = passed,
        violations = violations,
    );
}

/// Emit event: run finalization error (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}
