//! Stage execution errors.

use std::path::PathBuf;

use packline_core::ArtifactError;

/// Why a stage could not produce a result.
///
/// A command that runs and exits non-zero is not an error here; it yields a
/// failed `StageResult`. These variants cover everything else.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage {stage} has an empty command")]
    EmptyCommand { stage: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage {stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("required input missing: {0}")]
    MissingInput(PathBuf),

    #[error("expected output missing or empty: {0}")]
    MissingOutput(PathBuf),

    #[error("interpreter version mismatch: wanted {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("publication failed: {0}")]
    Publish(#[from] ArtifactError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = StageError::MissingInput(PathBuf::from("/ws/src/main.py"));
        assert!(err.to_string().contains("main.py"));

        let err = StageError::VersionMismatch {
            expected: "3.11".to_string(),
            found: "3.9.18".to_string(),
        };
        assert!(err.to_string().contains("3.11"));
        assert!(err.to_string().contains("3.9.18"));

        let err: StageError = ArtifactError::Transport("connection refused".to_string()).into();
        assert!(err.to_string().contains("connection refused"));
    }
}
