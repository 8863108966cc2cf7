//! Pipeline run state machine.
//!
//! ```text
//! Triggered -> Provisioned -> DependenciesInstalled -> Built -> Published
//!     \             \                  \                 \
//!      +-------------+------------------+-----------------+--> Failed | Cancelled
//! ```

use serde::{Deserialize, Serialize};

use crate::stage::StageKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Triggered,
    Provisioned,
    DependenciesInstalled,
    Built,
    Published,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Triggered => "triggered",
            PipelineState::Provisioned => "provisioned",
            PipelineState::DependenciesInstalled => "dependencies_installed",
            PipelineState::Built => "built",
            PipelineState::Published => "published",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }

    /// State reached once a stage of `kind` succeeds.
    ///
    /// Checkout alone does not advance the run; it stays `Triggered` until
    /// the runtime is provisioned.
    pub fn after(kind: StageKind) -> Self {
        match kind {
            StageKind::Checkout => PipelineState::Triggered,
            StageKind::SetupRuntime => PipelineState::Provisioned,
            StageKind::InstallDependencies => PipelineState::DependenciesInstalled,
            StageKind::BuildExecutable => PipelineState::Built,
            StageKind::PublishArtifact => PipelineState::Published,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Published | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed | Cancelled) => true,
            (Triggered, Provisioned)
            | (Provisioned, DependenciesInstalled)
            | (DependenciesInstalled, Built)
            | (Built, Published) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
