//! Stage execution.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use packline_core::{ArtifactRecord, ArtifactStore, RunId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StageError;
use crate::stage::{FailureKind, StageAction, StageConfig, StageKind};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    pub kind: StageKind,

    /// Exit code of the last command run (0 = success, -1 = never exited).
    pub exit_code: i32,

    /// Captured stdout of every command run.
    pub stdout: String,

    /// Captured stderr of every command run.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,

    /// Artifact published by this stage, if any.
    pub artifact: Option<ArtifactRecord>,
}

impl StageResult {
    /// Whether this stage passed.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Failure classification, `None` when the stage passed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        (!self.passed()).then(|| self.kind.failure_kind())
    }

    /// A failed result for a stage that errored before producing output.
    pub fn from_error(stage: &StageConfig, error: &StageError, duration_ms: u64) -> Self {
        Self {
            stage_name: stage.name.clone(),
            kind: stage.kind,
            exit_code: -1,
            stdout: String::new(),
            stderr: error.to_string(),
            duration_ms,
            success: false,
            artifact: None,
        }
    }
}

/// Captured output of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands with piped output.
///
/// Children are killed if the returned future is dropped, which is how
/// timeouts and cancellation stop a stage.
pub struct CommandRunner;

impl CommandRunner {
    pub async fn run(argv: &[String], cwd: Option<&Path>) -> Result<CommandOutput, StageError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(StageError::EmptyCommand {
                stage: "<unnamed>".to_string(),
            });
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        debug!(program = %program, ?args, cwd = ?cwd, "spawning command");
        let child = command.spawn().map_err(|source| StageError::Spawn {
            program: program.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Identity of the run a stage executes in.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: RunId,
    pub revision: String,
}

/// Executes a single stage.
///
/// `Ok` with a failed [`StageResult`] means the stage ran and failed (a
/// command exited non-zero). `Err` means it could not run to completion.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(
        &self,
        stage: &StageConfig,
        ctx: &StageContext,
    ) -> Result<StageResult, StageError>;
}

/// Production executor: real processes and a real artifact store.
pub struct LocalExecutor {
    artifacts: Arc<dyn ArtifactStore>,
}

impl LocalExecutor {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    async fn run_commands(
        stage: &StageConfig,
        commands: &[Vec<String>],
        requires: &[PathBuf],
        produces: Option<&Path>,
    ) -> Result<StageResult, StageError> {
        for path in requires {
            if !path.exists() {
                return Err(StageError::MissingInput(path.clone()));
            }
        }
        if commands.is_empty() {
            return Err(StageError::EmptyCommand {
                stage: stage.name.clone(),
            });
        }

        let mut result = StageResult {
            stage_name: stage.name.clone(),
            kind: stage.kind,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            success: true,
            artifact: None,
        };

        for argv in commands {
            if argv.is_empty() {
                return Err(StageError::EmptyCommand {
                    stage: stage.name.clone(),
                });
            }
            let output = CommandRunner::run(argv, stage.working_dir.as_deref()).await?;
            result.stdout.push_str(&output.stdout);
            result.stderr.push_str(&output.stderr);
            result.exit_code = output.exit_code;
            if !output.success() {
                result.success = false;
                return Ok(result);
            }
        }

        if let Some(dir) = produces {
            if !is_non_empty_dir(dir)? {
                return Err(StageError::MissingOutput(dir.to_path_buf()));
            }
        }
        Ok(result)
    }

    async fn provision(
        stage: &StageConfig,
        interpreter: &str,
        version: &str,
        venv_dir: &Path,
    ) -> Result<StageResult, StageError> {
        let cwd = stage.working_dir.as_deref();
        let banner =
            CommandRunner::run(&[interpreter.to_string(), "--version".to_string()], cwd).await?;
        // Older interpreters print the version on stderr.
        let reported = format!("{}{}", banner.stdout, banner.stderr);
        let found = parse_python_version(&reported).ok_or_else(|| StageError::VersionMismatch {
            expected: version.to_string(),
            found: reported.trim().to_string(),
        })?;
        if !version_matches(version, &found) {
            return Err(StageError::VersionMismatch {
                expected: version.to_string(),
                found,
            });
        }
        info!(interpreter, version = %found, "interpreter accepted");

        let venv = CommandRunner::run(
            &[
                interpreter.to_string(),
                "-m".to_string(),
                "venv".to_string(),
                venv_dir.to_string_lossy().to_string(),
            ],
            cwd,
        )
        .await?;

        Ok(StageResult {
            stage_name: stage.name.clone(),
            kind: stage.kind,
            exit_code: venv.exit_code,
            stdout: format!("{}{}", banner.stdout, venv.stdout),
            stderr: format!("{}{}", banner.stderr, venv.stderr),
            duration_ms: 0,
            success: venv.success(),
            artifact: None,
        })
    }

    async fn publish(
        &self,
        stage: &StageConfig,
        ctx: &StageContext,
        artifact_name: &str,
        path: &Path,
    ) -> Result<StageResult, StageError> {
        let record = self
            .artifacts
            .upload(artifact_name, &ctx.run_id, path)
            .await?;
        Ok(StageResult {
            stage_name: stage.name.clone(),
            kind: stage.kind,
            exit_code: 0,
            stdout: format!(
                "uploaded {} ({} files, {} bytes) as {}\n",
                path.display(),
                record.file_count,
                record.total_bytes,
                record.name
            ),
            stderr: String::new(),
            duration_ms: 0,
            success: true,
            artifact: Some(record),
        })
    }
}

#[async_trait]
impl StageExecutor for LocalExecutor {
    async fn execute(
        &self,
        stage: &StageConfig,
        ctx: &StageContext,
    ) -> Result<StageResult, StageError> {
        let start = Instant::now();
        let work = async {
            match &stage.action {
                StageAction::Run {
                    commands,
                    requires,
                    produces,
                } => Self::run_commands(stage, commands, requires, produces.as_deref()).await,
                StageAction::Provision {
                    interpreter,
                    version,
                    venv_dir,
                } => Self::provision(stage, interpreter, version, venv_dir).await,
                StageAction::Publish {
                    artifact_name,
                    path,
                } => self.publish(stage, ctx, artifact_name, path).await,
            }
        };

        let mut result = if stage.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(stage.timeout_secs), work)
                .await
                .map_err(|_| StageError::Timeout {
                    stage: stage.name.clone(),
                    secs: stage.timeout_secs,
                })??
        } else {
            work.await?
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

fn is_non_empty_dir(dir: &Path) -> Result<bool, StageError> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(std::fs::read_dir(dir)?.next().is_some())
}

fn version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Python\s+(\d+\.\d+(?:\.\d+)?)").ok())
        .as_ref()
}

/// Extract `X.Y[.Z]` from `python --version` output.
pub fn parse_python_version(output: &str) -> Option<String> {
    version_regex()?
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether `found` satisfies the pinned `wanted` prefix, component-wise
/// (`3.11` matches `3.11.4` but not `3.1`).
pub fn version_matches(wanted: &str, found: &str) -> bool {
    let found: Vec<&str> = found.split('.').collect();
    let wanted: Vec<&str> = wanted.split('.').collect();
    wanted.len() <= found.len() && wanted.iter().zip(&found).all(|(w, f)| w == f)
}
