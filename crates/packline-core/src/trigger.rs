//! Trigger evaluation: decides whether an event starts a pipeline run and
//! which revision that run is bound to.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::git;

/// An event that may start a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Trigger {
    /// A push landed on `branch` at `revision`.
    Push { branch: String, revision: String },
    /// Operator-initiated run, no parameters.
    ManualDispatch,
}

impl Trigger {
    pub fn describe(&self) -> String {
        match self {
            Trigger::Push { branch, revision } => format!("push:{branch}@{revision}"),
            Trigger::ManualDispatch => "manual_dispatch".to_string(),
        }
    }
}

/// A run the policy accepted, bound to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub source: String,
    pub revision: String,
    pub trigger: Trigger,
}

/// Resolves the head revision of a branch.
pub trait RevisionResolver: Send + Sync {
    fn resolve(&self, source: &str, branch: &str) -> Result<String>;
}

/// Resolver backed by `git ls-remote`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitResolver;

impl RevisionResolver for GitResolver {
    fn resolve(&self, source: &str, branch: &str) -> Result<String> {
        git::resolve_branch_head(source, branch)
    }
}

/// Which events start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    pub branch: String,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
        }
    }
}

impl TriggerPolicy {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    /// Evaluate `trigger` against this policy.
    ///
    /// Returns `Ok(None)` for pushes to other branches. Manual dispatch is
    /// bound to the branch head at evaluation time. A source or revision that
    /// starts with `-` is rejected.
    pub fn evaluate(
        &self,
        trigger: &Trigger,
        source: &str,
        resolver: &dyn RevisionResolver,
    ) -> Result<Option<RunRequest>> {
        git::check_argument("source", source)?;
        let revision = match trigger {
            Trigger::Push { branch, revision } => {
                let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                if branch != self.branch {
                    debug!(branch, designated = %self.branch, "push ignored");
                    return Ok(None);
                }
                revision.clone()
            }
            Trigger::ManualDispatch => resolver.resolve(source, &self.branch)?,
        };
        git::check_argument("revision", &revision)?;

        info!(trigger = %trigger.describe(), %revision, "run accepted");
        Ok(Some(RunRequest {
            source: source.to_string(),
            revision,
            trigger: trigger.clone(),
        }))
    }
}
