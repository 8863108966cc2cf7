//! Pipeline orchestration and run recording.

use std::sync::Arc;
use std::time::Instant;

use packline_core::{
    obs, ArtifactRecord, ContentDigest, RunId, RunLedger, RunMetadata, RunRecorder, RunStatus,
    RunSummary,
};
use serde_json::json;
use tracing::{info, warn, Instrument};

use crate::cancel::CancelToken;
use crate::gate::kinds;
use crate::runner::{StageContext, StageExecutor, StageResult};
use crate::spec::PipelineSpec;
use crate::stage::{FailureKind, StageConfig, PIPELINE_NAME};
use crate::state::PipelineState;

/// Captured output kept in ledger events, from the end of the stream.
const OUTPUT_TAIL_BYTES: usize = 16 * 1024;

/// Result of a complete pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub run_id: RunId,

    /// Final state: `Published`, `Failed` or `Cancelled` for a full plan.
    pub state: PipelineState,

    /// Results of the stages that ran, in order.
    pub stages: Vec<StageResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    pub spec_digest: ContentDigest,

    /// Artifact published by the run, if it got that far.
    pub artifact: Option<ArtifactRecord>,
}

impl PipelineResult {
    /// Whether every planned stage ran and passed.
    pub fn success(&self) -> bool {
        !matches!(self.state, PipelineState::Failed | PipelineState::Cancelled)
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }

    /// The stage that stopped the run, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| !s.passed())
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.state {
            PipelineState::Failed => self.failed_stage().and_then(|s| s.failure_kind()),
            _ => None,
        }
    }
}

fn tail(text: &str) -> &str {
    if text.len() <= OUTPUT_TAIL_BYTES {
        return text;
    }
    let mut start = text.len() - OUTPUT_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// How a single stage ended.
enum Outcome {
    Passed(StageResult),
    Failed(StageResult, String),
    Cancelled,
}

/// Packaging pipeline orchestrator.
pub struct PackagingPipeline;

impl PackagingPipeline {
    /// Execute `stages` in order and record the run into `ledger`.
    ///
    /// Each stage produces a `stage_started` event followed by exactly one of
    /// `stage_succeeded`, `stage_failed` or `stage_cancelled`. The first
    /// failure stops the run; later stages are never started.
    ///
    /// The run is finalized as completed, failed or cancelled. If the ledger
    /// rejects an event mid-run, the run is marked failed before the error is
    /// returned.
    pub async fn run(
        ledger: Arc<dyn RunLedger>,
        executor: &dyn StageExecutor,
        spec: &PipelineSpec,
        stages: Vec<StageConfig>,
        cancel: &CancelToken,
    ) -> anyhow::Result<PipelineResult> {
        let start = Instant::now();
        let spec_digest = spec.digest();

        let metadata = RunMetadata {
            revision: Some(spec.revision.clone()),
            pipeline: PIPELINE_NAME.to_string(),
            tags: json!({
                "source": &spec.source,
                "trigger": &spec.trigger,
                "interpreter_version": &spec.interpreter_version,
                "stages": stages.iter().map(|s| &s.name).collect::<Vec<_>>(),
            }),
        };

        let recorder = RunRecorder::start(ledger, &spec_digest, metadata).await?;
        let run_id = recorder.run_id().clone();
        let span = tracing::info_span!("packline.run", run_id = %run_id);

        async move {
            info!(revision = %spec.revision, "starting packaging pipeline");
            let driven = Self::drive(&recorder, executor, spec, stages, cancel).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (state, results, artifact) = match driven {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(error = %e, "run aborted, marking it failed");
                    let summary = RunSummary {
                        total_events: recorder.events_recorded(),
                        artifact_digest: None,
                        duration_ms,
                        success: false,
                    };
                    if let Err(finish_err) = recorder.finish(RunStatus::Failed, summary).await {
                        obs::emit_run_finalize_error(&run_id.0, &finish_err);
                    }
                    return Err(e);
                }
            };

            let status = match state {
                PipelineState::Failed => RunStatus::Failed,
                PipelineState::Cancelled => RunStatus::Cancelled,
                _ => RunStatus::Completed,
            };
            let summary = RunSummary {
                total_events: recorder.events_recorded(),
                artifact_digest: artifact.as_ref().map(|a| a.manifest_digest.clone()),
                duration_ms,
                success: status == RunStatus::Completed,
            };
            if let Err(e) = recorder.finish(status, summary).await {
                obs::emit_run_finalize_error(&run_id.0, &e);
                return Err(e.into());
            }
            info!(state = %state, duration_ms, "packaging pipeline finished");

            Ok(PipelineResult {
                run_id,
                state,
                stages: results,
                duration_ms,
                spec_digest,
                artifact,
            })
        }
        .instrument(span)
        .await
    }

    /// Run the stages and record their events. Returns the final state, the
    /// stage results and the published artifact.
    async fn drive(
        recorder: &RunRecorder,
        executor: &dyn StageExecutor,
        spec: &PipelineSpec,
        stages: Vec<StageConfig>,
        cancel: &CancelToken,
    ) -> anyhow::Result<(PipelineState, Vec<StageResult>, Option<ArtifactRecord>)> {
        let run_id = recorder.run_id().clone();
        recorder
            .record(
                kinds::RUN_TRIGGERED,
                json!({
                    "source": &spec.source,
                    "revision": &spec.revision,
                    "trigger": &spec.trigger,
                }),
            )
            .await?;

        let ctx = StageContext {
            run_id: run_id.clone(),
            revision: spec.revision.clone(),
        };
        let mut state = PipelineState::Triggered;
        let mut results = Vec::new();
        let mut artifact: Option<ArtifactRecord> = None;

        for stage in stages {
            if cancel.is_cancelled() {
                info!(stage = %stage.name, "cancelled before stage start");
                state = Self::transition(recorder, state, PipelineState::Cancelled).await?;
                break;
            }

            recorder
                .record(
                    kinds::STAGE_STARTED,
                    json!({
                        "stage": &stage.name,
                        "kind": stage.kind,
                        "timeout_secs": stage.timeout_secs,
                        "action": &stage.action,
                    }),
                )
                .await?;

            let stage_start = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                executed = executor.execute(&stage, &ctx) => match executed {
                    Ok(result) if result.passed() => Outcome::Passed(result),
                    Ok(result) => {
                        let error = format!(
                            "stage {} exited with code {}",
                            result.stage_name, result.exit_code
                        );
                        Outcome::Failed(result, error)
                    }
                    // Execution errors still produce a stage_failed event so
                    // the gate sees them.
                    Err(e) => {
                        let elapsed = stage_start.elapsed().as_millis() as u64;
                        Outcome::Failed(StageResult::from_error(&stage, &e, elapsed), e.to_string())
                    }
                },
            };

            match outcome {
                Outcome::Passed(result) => {
                    obs::emit_stage_finished(&run_id.0, &stage.name, true, result.duration_ms);
                    if let Some(record) = &result.artifact {
                        recorder
                            .record(
                                kinds::ARTIFACT_PUBLISHED,
                                json!({
                                    "stage": &stage.name,
                                    "name": &record.name,
                                    "manifest_digest": record.manifest_digest.as_str(),
                                    "layout_digest": record.layout_digest.as_str(),
                                    "file_count": record.file_count,
                                    "total_bytes": record.total_bytes,
                                }),
                            )
                            .await?;
                        obs::emit_artifact_published(
                            &run_id.0,
                            &record.name,
                            record.manifest_digest.short(),
                            record.file_count,
                        );
                        artifact = Some(record.clone());
                    }
                    recorder
                        .record(
                            kinds::STAGE_SUCCEEDED,
                            json!({
                                "stage": &stage.name,
                                "exit_code": result.exit_code,
                                "duration_ms": result.duration_ms,
                                "stdout": tail(&result.stdout),
                                "stderr": tail(&result.stderr),
                            }),
                        )
                        .await?;
                    let next = PipelineState::after(stage.kind);
                    if next != state {
                        state = Self::transition(recorder, state, next).await?;
                    }
                    results.push(result);
                }
                Outcome::Failed(result, error) => {
                    obs::emit_stage_finished(&run_id.0, &stage.name, false, result.duration_ms);
                    warn!(stage = %stage.name, failure_kind = %stage.kind.failure_kind(), %error, "stage failed");
                    recorder
                        .record(
                            kinds::STAGE_FAILED,
                            json!({
                                "stage": &stage.name,
                                "failure_kind": stage.kind.failure_kind(),
                                "exit_code": result.exit_code,
                                "duration_ms": result.duration_ms,
                                "stdout": tail(&result.stdout),
                                "stderr": tail(&result.stderr),
                                "error": error,
                            }),
                        )
                        .await?;
                    state = Self::transition(recorder, state, PipelineState::Failed).await?;
                    results.push(result);
                    break;
                }
                Outcome::Cancelled => {
                    let elapsed = stage_start.elapsed().as_millis() as u64;
                    warn!(stage = %stage.name, "stage cancelled");
                    recorder
                        .record(
                            kinds::STAGE_CANCELLED,
                            json!({ "stage": &stage.name, "duration_ms": elapsed }),
                        )
                        .await?;
                    state = Self::transition(recorder, state, PipelineState::Cancelled).await?;
                    results.push(StageResult {
                        stage_name: stage.name.clone(),
                        kind: stage.kind,
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: "cancelled".to_string(),
                        duration_ms: elapsed,
                        success: false,
                        artifact: None,
                    });
                    break;
                }
            }
        }

        Ok((state, results, artifact))
    }

    async fn transition(
        recorder: &RunRecorder,
        from: PipelineState,
        to: PipelineState,
    ) -> anyhow::Result<PipelineState> {
        if !from.can_transition_to(to) {
            anyhow::bail!("illegal pipeline transition {from} -> {to}");
        }
        recorder
            .record(kinds::STATE_CHANGED, json!({ "from": from, "to": to }))
            .await?;
        Ok(to)
    }
}
