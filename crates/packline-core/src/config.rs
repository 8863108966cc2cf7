//! Pipeline configuration.
//!
//! Loaded from `packline.toml` (or an explicit path), then overridden from
//! the environment:
//!
//! | variable             | field                 |
//! |----------------------|-----------------------|
//! | `PACKLINE_STATE_DIR` | `store.state_dir`     |
//! | `PACKLINE_DB_URL`    | `store.db_url`        |
//! | `PACKLINE_STORE_URL` | `store.url`           |
//! | `PACKLINE_PYTHON`    | `runtime.interpreter` |
//!
//! The packaging identity (entry point, app name, artifact name) is not
//! configurable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PacklineError, Result};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "packline.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacklineConfig {
    pub trigger: TriggerConfig,
    pub runtime: RuntimeConfig,
    pub timeouts: TimeoutConfig,
    pub store: StoreConfig,
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Branch whose pushes start a run.
    pub branch: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter used to create the run's environment.
    pub interpreter: String,
    /// Pinned version prefix, e.g. "3.11".
    pub version: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            version: "3.11".to_string(),
        }
    }
}

/// Per-stage wall clock limits, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub checkout_secs: u64,
    pub setup_secs: u64,
    pub install_secs: u64,
    pub build_secs: u64,
    pub publish_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            checkout_secs: 600,
            setup_secs: 600,
            install_secs: 1800,
            build_secs: 3600,
            publish_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root for the run database and local artifact blobs.
    pub state_dir: PathBuf,
    /// Remote artifact store base URL; local store when unset.
    pub url: Option<String>,
    /// SurrealDB endpoint; `surrealkv://<state_dir>/db` when unset.
    pub db_url: Option<String>,
    /// Days an artifact is retained; 0 keeps artifacts forever.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".packline"),
            url: None,
            db_url: None,
            retention_days: 90,
        }
    }
}

impl StoreConfig {
    /// Local artifact blob root.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Where run workspaces are created; system temp dir when unset.
    pub parent: Option<PathBuf>,
    /// Keep workspaces after the run ends.
    pub keep: bool,
}

impl PacklineConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration and apply environment overrides.
    ///
    /// An explicit `path` must exist. Without one, `packline.toml` in the
    /// working directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    PacklineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&text)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_toml(&std::fs::read_to_string(DEFAULT_CONFIG_FILE)?)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("PACKLINE_STATE_DIR").filter(|v| !v.is_empty()) {
            self.store.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("PACKLINE_DB_URL").filter(|v| !v.is_empty()) {
            self.store.db_url = Some(url);
        }
        if let Some(url) = lookup("PACKLINE_STORE_URL").filter(|v| !v.is_empty()) {
            self.store.url = Some(url);
        }
        if let Some(python) = lookup("PACKLINE_PYTHON").filter(|v| !v.is_empty()) {
            self.runtime.interpreter = python;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.trigger.branch.trim().is_empty() {
            return Err(PacklineError::Config("trigger.branch is empty".to_string()));
        }
        if self.runtime.interpreter.trim().is_empty() {
            return Err(PacklineError::Config(
                "runtime.interpreter is empty".to_string(),
            ));
        }
        let version_ok = !self.runtime.version.is_empty()
            && self
                .runtime
                .version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
        if !version_ok {
            return Err(PacklineError::Config(format!(
                "runtime.version must look like 3.11, got {:?}",
                self.runtime.version
            )));
        }
        let t = &self.timeouts;
        if [
            t.checkout_secs,
            t.setup_secs,
            t.install_secs,
            t.build_secs,
            t.publish_secs,
        ]
        .contains(&0)
        {
            return Err(PacklineError::Config(
                "stage timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_gives_defaults() {
        let config = PacklineConfig::from_toml("").unwrap();
        assert_eq!(config, PacklineConfig::default());
        assert_eq!(config.trigger.branch, "main");
        assert_eq!(config.runtime.version, "3.11");
        assert_eq!(config.store.retention_days, 90);
        assert_eq!(config.timeouts.checkout_secs, 600);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PacklineConfig::from_toml(
            r#"
            [runtime]
            version = "3.12"

            [timeouts]
            build_secs = 7200

            [store]
            url = "https://artifacts.example.com/"
            retention_days = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.version, "3.12");
        assert_eq!(config.runtime.interpreter, RuntimeConfig::default().interpreter);
        assert_eq!(config.timeouts.build_secs, 7200);
        assert_eq!(config.timeouts.install_secs, 1800);
        assert_eq!(
            config.store.url.as_deref(),
            Some("https://artifacts.example.com/")
        );
        assert_eq!(config.store.retention_days, 0);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = PacklineConfig::from_toml("[runtime\nversion=").unwrap_err();
        assert!(matches!(err, PacklineError::ConfigParse(_)));
    }

    #[test]
    fn bad_version_is_rejected() {
        let err = PacklineConfig::from_toml("[runtime]\nversion = \"three\"").unwrap_err();
        assert!(matches!(err, PacklineError::Config(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(PacklineConfig::from_toml("[timeouts]\nsetup_secs = 0").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PACKLINE_STATE_DIR", "/var/lib/packline"),
            ("PACKLINE_DB_URL", "ws://db:8000"),
            ("PACKLINE_PYTHON", "/opt/py311/bin/python3"),
            ("PACKLINE_STORE_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = PacklineConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.store.state_dir, PathBuf::from("/var/lib/packline"));
        assert_eq!(config.store.db_url.as_deref(), Some("ws://db:8000"));
        assert_eq!(config.runtime.interpreter, "/opt/py311/bin/python3");
        // Empty values are ignored.
        assert_eq!(config.store.url, None);
        assert_eq!(
            config.store.artifacts_dir(),
            PathBuf::from("/var/lib/packline/artifacts")
        );
    }

    #[test]
    fn explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = PacklineConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, PacklineError::Config(_)));
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packline.toml");
        std::fs::write(&path, "[trigger]\nbranch = \"release\"\n").unwrap();
        let config = PacklineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.trigger.branch, "release");
    }
}
