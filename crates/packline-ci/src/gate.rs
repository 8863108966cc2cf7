//! Run gate: re-derives a run's verdict from its recorded events.

use std::collections::BTreeMap;

use packline_core::RunEvent;
use serde::{Deserialize, Serialize};

use crate::stage::ARTIFACT_NAME;

/// Event kinds written by the pipeline.
pub mod kinds {
    pub const RUN_TRIGGERED: &str = "run_triggered";
    pub const STAGE_STARTED: &str = "stage_started";
    pub const STAGE_SUCCEEDED: &str = "stage_succeeded";
    pub const STAGE_FAILED: &str = "stage_failed";
    pub const STAGE_CANCELLED: &str = "stage_cancelled";
    pub const STATE_CHANGED: &str = "state_changed";
    pub const ARTIFACT_PUBLISHED: &str = "artifact_published";
}

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Run gate evaluation rules.
pub struct RunGate;

impl RunGate {
    /// Evaluate a run from its ordered events.
    ///
    /// Rules:
    /// - every started stage reaches `stage_succeeded`, `stage_failed` or
    ///   `stage_cancelled`
    /// - no stage starts after a failure or cancellation
    /// - a run with no failed or cancelled stage publishes exactly one
    ///   artifact, named `Comic Reader Windows`
    /// - any failed or cancelled stage fails the gate
    pub fn evaluate(events: &[RunEvent]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut open: BTreeMap<String, u64> = BTreeMap::new();
        let mut halted_by: Option<String> = None;
        let mut published = Vec::new();

        for event in events {
            let stage = event.payload["stage"].as_str().unwrap_or("unknown").to_string();
            match event.kind.as_str() {
                kinds::STAGE_STARTED => {
                    if let Some(cause) = &halted_by {
                        violations.push(format!(
                            "Stage '{stage}' started after '{cause}' stopped the run"
                        ));
                    }
                    open.insert(stage, event.seq);
                }
                kinds::STAGE_SUCCEEDED => {
                    open.remove(&stage);
                }
                kinds::STAGE_FAILED => {
                    open.remove(&stage);
                    let kind = event.payload["failure_kind"].as_str().unwrap_or("unknown");
                    let error = event.payload["error"].as_str().unwrap_or("no error recorded");
                    violations.push(format!("Stage '{stage}' failed ({kind}): {error}"));
                    halted_by.get_or_insert(stage);
                }
                kinds::STAGE_CANCELLED => {
                    open.remove(&stage);
                    violations.push(format!("Stage '{stage}' was cancelled"));
                    halted_by.get_or_insert(stage);
                }
                kinds::ARTIFACT_PUBLISHED => {
                    let name = event.payload["name"].as_str().unwrap_or("").to_string();
                    if name != ARTIFACT_NAME {
                        violations.push(format!(
                            "Artifact published as '{name}', expected '{ARTIFACT_NAME}'"
                        ));
                    }
                    published.push(name);
                }
                _ => {}
            }
        }

        for (stage, seq) in &open {
            violations.push(format!(
                "Stage '{stage}' started at seq {seq} but never finished"
            ));
        }

        if halted_by.is_none() && published.len() != 1 {
            violations.push(format!(
                "Passing run must publish exactly one artifact, published {}",
                published.len()
            ));
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("Published '{ARTIFACT_NAME}'")
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
