//! Pipeline specification and identity.

use packline_core::{ContentDigest, RunRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inputs that identify a pipeline run.
///
/// Two runs with equal specs packaged the same revision the same way, so
/// they share a [`PipelineSpec::digest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineSpec {
    /// Repository path or URL.
    pub source: String,

    /// Commit the run is bound to.
    pub revision: String,

    /// Human-readable trigger, e.g. `push:main@abc123`.
    pub trigger: String,

    /// Pinned interpreter version.
    pub interpreter_version: String,

    /// SHA-256 digest of ordered stage names.
    pub stages_digest: String,
}

impl PipelineSpec {
    pub fn new(request: &RunRequest, interpreter_version: &str, stages: &[String]) -> Self {
        Self {
            source: request.source.clone(),
            revision: request.revision.clone(),
            trigger: request.trigger.describe(),
            interpreter_version: interpreter_version.to_string(),
            stages_digest: compute_stages_digest(stages),
        }
    }

    /// Content digest of the run identity.
    ///
    /// The trigger is recorded but not hashed: a push and a manual dispatch
    /// of the same revision are the same packaging job.
    pub fn digest(&self) -> ContentDigest {
        let mut buf = Vec::new();
        for field in [
            self.source.as_str(),
            self.revision.as_str(),
            self.interpreter_version.as_str(),
            self.stages_digest.as_str(),
        ] {
            buf.extend_from_slice(field.as_bytes());
            buf.push(0);
        }
        ContentDigest::from_bytes(&buf)
    }
}

/// Compute deterministic digest of ordered stage names.
fn compute_stages_digest(stages: &[String]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
