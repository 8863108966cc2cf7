//! Domain-level error taxonomy for packline.

use packline_state::StorageError;

/// packline domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PacklineError {
    #[error("git error: {0}")]
    GitError(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for packline domain operations.
pub type Result<T> = std::result::Result<T, PacklineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_error_display() {
        let err = PacklineError::GitError("not a repository".to_string());
        assert!(err.to_string().contains("git error"));
        assert!(err.to_string().contains("not a repository"));
    }

    #[test]
    fn test_storage_error_converts() {
        let err: PacklineError = StorageError::Backend("db down".to_string()).into();
        assert!(err.to_string().contains("db down"));
    }
}
