//! Packaging stage definitions and planning.

use std::path::PathBuf;

use packline_core::config::PacklineConfig;
use packline_core::{RunRequest, Workspace};
use serde::{Deserialize, Serialize};

/// Display name of the packaged application.
pub const APP_NAME: &str = "Comic Reader";
/// Name the build output is published under.
pub const ARTIFACT_NAME: &str = "Comic Reader Windows";
/// Application entry point at the repository root.
pub const ENTRY_POINT: &str = "main.py";
/// Dependency manifest at the repository root.
pub const DEPENDENCY_MANIFEST: &str = "requirements.txt";
/// Package installed alongside the manifest.
pub const PACKAGING_TOOL: &str = "pyinstaller";
/// Module invoked to run the packaging tool.
pub const PACKAGING_MODULE: &str = "PyInstaller";
/// Directory the packaging tool writes bundles to.
pub const OUTPUT_DIR: &str = "dist";
/// Pipeline name recorded on every run.
pub const PIPELINE_NAME: &str = "comic-reader-windows";

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Clone the repository and check out the run's revision.
    Checkout,
    /// Verify the pinned interpreter and create the environment.
    SetupRuntime,
    /// Upgrade the installer, then install the manifest plus packaging tool.
    InstallDependencies,
    /// Run the packaging tool against the entry point.
    BuildExecutable,
    /// Upload the build output.
    PublishArtifact,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Checkout,
        StageKind::SetupRuntime,
        StageKind::InstallDependencies,
        StageKind::BuildExecutable,
        StageKind::PublishArtifact,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Checkout => "checkout",
            StageKind::SetupRuntime => "setup_runtime",
            StageKind::InstallDependencies => "install_dependencies",
            StageKind::BuildExecutable => "build_executable",
            StageKind::PublishArtifact => "publish_artifact",
        }
    }

    /// How a failure of this stage is classified.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StageKind::Checkout | StageKind::SetupRuntime => FailureKind::Acquisition,
            StageKind::InstallDependencies => FailureKind::Dependency,
            StageKind::BuildExecutable => FailureKind::Build,
            StageKind::PublishArtifact => FailureKind::Publication,
        }
    }
}

/// Failure classification. Every failure is fatal to the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Revision or interpreter could not be obtained.
    Acquisition,
    /// The dependency manifest could not be satisfied.
    Dependency,
    /// The packaging tool failed or produced nothing.
    Build,
    /// The artifact could not be uploaded.
    Publication,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Acquisition => "acquisition",
            FailureKind::Dependency => "dependency",
            FailureKind::Build => "build",
            FailureKind::Publication => "publication",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage does when executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StageAction {
    /// Run commands in order, stopping at the first non-zero exit.
    Run {
        commands: Vec<Vec<String>>,
        /// Paths that must exist before anything runs.
        requires: Vec<PathBuf>,
        /// Directory that must exist and be non-empty afterwards.
        produces: Option<PathBuf>,
    },
    /// Check the interpreter version, then create an environment.
    Provision {
        interpreter: String,
        version: String,
        venv_dir: PathBuf,
    },
    /// Upload a directory to the artifact store.
    Publish { artifact_name: String, path: PathBuf },
}

/// Configuration for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name as recorded in the run ledger.
    pub name: String,

    pub kind: StageKind,

    pub action: StageAction,

    /// Working directory for commands; inherited when unset.
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds for the whole stage.
    pub timeout_secs: u64,
}

impl StageConfig {
    pub fn new(kind: StageKind, action: StageAction, timeout_secs: u64) -> Self {
        Self {
            name: kind.name().to_string(),
            kind,
            action,
            working_dir: None,
            timeout_secs,
        }
    }

    /// A stage of `kind` that just runs `commands`.
    pub fn commands(kind: StageKind, commands: Vec<Vec<String>>, timeout_secs: u64) -> Self {
        Self::new(
            kind,
            StageAction::Run {
                commands,
                requires: Vec::new(),
                produces: None,
            },
            timeout_secs,
        )
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Build output directory inside a checkout.
pub fn build_output_dir(source_dir: &std::path::Path) -> PathBuf {
    source_dir.join(OUTPUT_DIR).join(APP_NAME)
}

/// Plan the five stages for `request` inside `workspace`.
pub fn plan_stages(
    config: &PacklineConfig,
    workspace: &Workspace,
    request: &RunRequest,
) -> Vec<StageConfig> {
    let src = workspace.source_dir();
    let src_arg = src.to_string_lossy().to_string();
    let python = workspace.venv_python().to_string_lossy().to_string();
    let output = build_output_dir(&src);
    let timeouts = &config.timeouts;

    let checkout = StageConfig::commands(
        StageKind::Checkout,
        vec![
            argv([
                "git",
                "clone",
                "--quiet",
                "--no-checkout",
                "--",
                request.source.as_str(),
                src_arg.as_str(),
            ]),
            argv([
                "git",
                "-C",
                src_arg.as_str(),
                "checkout",
                "--quiet",
                "--detach",
                request.revision.as_str(),
            ]),
        ],
        timeouts.checkout_secs,
    )
    .in_dir(workspace.root());

    let setup = StageConfig::new(
        StageKind::SetupRuntime,
        StageAction::Provision {
            interpreter: config.runtime.interpreter.clone(),
            version: config.runtime.version.clone(),
            venv_dir: workspace.venv_dir(),
        },
        timeouts.setup_secs,
    )
    .in_dir(workspace.root());

    let install = StageConfig::new(
        StageKind::InstallDependencies,
        StageAction::Run {
            commands: vec![
                argv([python.as_str(), "-m", "pip", "install", "--upgrade", "pip"]),
                argv([
                    python.as_str(),
                    "-m",
                    "pip",
                    "install",
                    "-r",
                    DEPENDENCY_MANIFEST,
                    PACKAGING_TOOL,
                ]),
            ],
            requires: vec![src.join(DEPENDENCY_MANIFEST)],
            produces: None,
        },
        timeouts.install_secs,
    )
    .in_dir(&src);

    let build = StageConfig::new(
        StageKind::BuildExecutable,
        StageAction::Run {
            commands: vec![argv([
                python.as_str(),
                "-m",
                PACKAGING_MODULE,
                "--noconfirm",
                "--windowed",
                "--name",
                APP_NAME,
                ENTRY_POINT,
            ])],
            requires: vec![src.join(ENTRY_POINT)],
            produces: Some(output.clone()),
        },
        timeouts.build_secs,
    )
    .in_dir(&src);

    let publish = StageConfig::new(
        StageKind::PublishArtifact,
        StageAction::Publish {
            artifact_name: ARTIFACT_NAME.to_string(),
            path: output,
        },
        timeouts.publish_secs,
    );

    vec![checkout, setup, install, build, publish]
}

#[cfg(test)]
mod tests {
    use super::*;
    use packline_core::Trigger;

    fn request() -> RunRequest {
        RunRequest {
            source: "https://example.com/comic-reader.git".to_string(),
            revision: "0123abcd".to_string(),
            trigger: Trigger::ManualDispatch,
        }
    }

    #[test]
    fn stage_names_are_stable() {
        let names: Vec<_> = StageKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "checkout",
                "setup_runtime",
                "install_dependencies",
                "build_executable",
                "publish_artifact"
            ]
        );
    }

    #[test]
    fn each_stage_maps_to_one_failure_kind() {
        assert_eq!(StageKind::Checkout.failure_kind(), FailureKind::Acquisition);
        assert_eq!(StageKind::SetupRuntime.failure_kind(), FailureKind::Acquisition);
        assert_eq!(
            StageKind::InstallDependencies.failure_kind(),
            FailureKind::Dependency
        );
        assert_eq!(StageKind::BuildExecutable.failure_kind(), FailureKind::Build);
        assert_eq!(
            StageKind::PublishArtifact.failure_kind(),
            FailureKind::Publication
        );
    }

    #[test]
    fn plan_follows_fixed_order() {
        let ws = Workspace::create().unwrap();
        let stages = plan_stages(&PacklineConfig::default(), &ws, &request());
        let kinds: Vec<_> = stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }

    #[test]
    fn checkout_pins_revision() {
        let ws = Workspace::create().unwrap();
        let stages = plan_stages(&PacklineConfig::default(), &ws, &request());
        let StageAction::Run { commands, .. } = &stages[0].action else {
            panic!("checkout should run commands");
        };
        assert_eq!(commands.len(), 2);
        let dashes = commands[0].iter().position(|a| a == "--").unwrap();
        assert_eq!(commands[0][dashes + 1], "https://example.com/comic-reader.git");
        assert_eq!(commands[1].last().unwrap(), "0123abcd");
    }

    #[test]
    fn build_uses_fixed_packaging_flags() {
        let ws = Workspace::create().unwrap();
        let stages = plan_stages(&PacklineConfig::default(), &ws, &request());
        let StageAction::Run {
            commands,
            requires,
            produces,
        } = &stages[3].action
        else {
            panic!("build should run commands");
        };
        let tail: Vec<_> = commands[0][1..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-m",
                "PyInstaller",
                "--noconfirm",
                "--windowed",
                "--name",
                "Comic Reader",
                "main.py"
            ]
        );
        assert_eq!(requires, &vec![ws.source_dir().join("main.py")]);
        assert_eq!(
            produces.as_deref(),
            Some(ws.source_dir().join("dist").join("Comic Reader").as_path())
        );
        assert_eq!(stages[3].working_dir.as_deref(), Some(ws.source_dir().as_path()));
    }

    #[test]
    fn install_requires_manifest_and_adds_packaging_tool() {
        let ws = Workspace::create().unwrap();
        let stages = plan_stages(&PacklineConfig::default(), &ws, &request());
        let StageAction::Run {
            commands, requires, ..
        } = &stages[2].action
        else {
            panic!("install should run commands");
        };
        assert_eq!(commands[0][1..], argv(["-m", "pip", "install", "--upgrade", "pip"])[..]);
        assert!(commands[1].ends_with(&argv(["-r", "requirements.txt", "pyinstaller"])));
        assert_eq!(requires, &vec![ws.source_dir().join("requirements.txt")]);
        assert_eq!(stages[2].timeout_secs, 1800);
    }

    #[test]
    fn publish_uses_constant_artifact_name() {
        let ws = Workspace::create().unwrap();
        let stages = plan_stages(&PacklineConfig::default(), &ws, &request());
        assert_eq!(
            stages[4].action,
            StageAction::Publish {
                artifact_name: "Comic Reader Windows".to_string(),
                path: build_output_dir(&ws.source_dir()),
            }
        );
    }

    #[test]
    fn setup_uses_configured_runtime() {
        let ws = Workspace::create().unwrap();
        let mut config = PacklineConfig::default();
        config.runtime.interpreter = "/opt/python3.11".to_string();
        let stages = plan_stages(&config, &ws, &request());
        assert_eq!(
            stages[1].action,
            StageAction::Provision {
                interpreter: "/opt/python3.11".to_string(),
                version: "3.11".to_string(),
                venv_dir: ws.venv_dir(),
            }
        );
    }
}
