//! packline - packaging pipeline runner
//!
//! The `packline` command packages the Comic Reader desktop app and
//! publishes the bundle as the `Comic Reader Windows` artifact.
//!
//! ## Commands
//!
//! - `run`: manual dispatch against the designated branch head
//! - `trigger push`: evaluate a push event and run if it targets the branch
//! - `runs`: inspect recorded runs
//! - `artifacts`: list, fetch and prune published artifacts

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use packline_ci::{
    cancel_pair, plan_stages, LocalExecutor, PackagingPipeline, PipelineResult, PipelineSpec,
    RunGate, StageResult, ARTIFACT_NAME,
};
use packline_core::config::PacklineConfig;
use packline_core::obs::{self, RunSpan};
use packline_core::{
    ArtifactStore, ContentDigest, FsCasStore, GitResolver, HttpArtifactStore, LocalArtifactStore,
    RunId, RunLedger, RunRequest, Trigger, TriggerPolicy, Workspace,
};
use packline_state::{SurrealArtifactRegistry, SurrealRunLedger};

#[derive(Parser)]
#[command(name = "packline")]
#[command(author = "Packline Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package the Comic Reader app and publish it as an artifact", long_about = None)]
struct Cli {
    /// Configuration file (default: ./packline.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the head of the designated branch
    Run {
        /// Repository path or URL
        #[arg(short, long, default_value = ".")]
        source: String,

        /// Keep the run workspace after the run ends
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Deliver a trigger event
    Trigger {
        #[command(subcommand)]
        event: TriggerEvent,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Manage published artifacts
    Artifacts {
        #[command(subcommand)]
        action: ArtifactsAction,
    },
}

#[derive(Subcommand)]
enum TriggerEvent {
    /// A push of `revision` to `branch`
    Push {
        /// Branch that received the push
        #[arg(short, long)]
        branch: String,

        /// Commit the branch now points at
        #[arg(short, long)]
        revision: String,

        /// Repository path or URL
        #[arg(short, long, default_value = ".")]
        source: String,

        /// Keep the run workspace after the run ends
        #[arg(long)]
        keep_workspace: bool,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List runs, newest first
    List {
        /// Only runs with this spec digest
        #[arg(long)]
        spec: Option<String>,
    },

    /// Show a run and its events
    Show {
        /// Run ID
        run_id: String,
    },
}

#[derive(Subcommand)]
enum ArtifactsAction {
    /// List artifact records, newest first
    List {
        /// Only artifacts with this name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Restore a published artifact into a directory
    Fetch {
        /// Run that published the artifact
        #[arg(long)]
        run: String,

        /// Artifact name
        #[arg(short, long, default_value = ARTIFACT_NAME)]
        name: String,

        /// Destination directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Remove artifacts whose retention has lapsed
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    packline_core::init_tracing(cli.json, level);

    let config =
        PacklineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            source,
            keep_workspace,
        } => cmd_run(&config, Trigger::ManualDispatch, &source, keep_workspace).await,
        Commands::Trigger { event } => match event {
            TriggerEvent::Push {
                branch,
                revision,
                source,
                keep_workspace,
            } => {
                let trigger = Trigger::Push { branch, revision };
                cmd_run(&config, trigger, &source, keep_workspace).await
            }
        },
        Commands::Runs { action } => {
            let backends = Backends::open(&config).await?;
            match action {
                RunsAction::List { spec } => cmd_runs_list(&backends, spec.as_deref()).await,
                RunsAction::Show { run_id } => cmd_runs_show(&backends, &run_id).await,
            }
        }
        Commands::Artifacts { action } => {
            let backends = Backends::open(&config).await?;
            match action {
                ArtifactsAction::List { name } => {
                    cmd_artifacts_list(&backends, name.as_deref()).await
                }
                ArtifactsAction::Fetch { run, name, out } => {
                    cmd_artifacts_fetch(&backends, &run, &name, &out).await
                }
                ArtifactsAction::Prune => cmd_artifacts_prune(&backends).await,
            }
        }
    }
}

/// Run ledger and artifact store selected by configuration.
struct Backends {
    ledger: Arc<dyn RunLedger>,
    store: Arc<dyn ArtifactStore>,
}

impl Backends {
    async fn open(config: &PacklineConfig) -> Result<Self> {
        let db = match &config.store.db_url {
            Some(url) => packline_state::connect(url).await,
            None => packline_state::connect_local(&config.store.state_dir).await,
        }
        .context("Failed to connect to packline database")?;

        let ledger: Arc<dyn RunLedger> = Arc::new(SurrealRunLedger::new(db.clone()));
        let retention = config.store.retention_days;
        let store: Arc<dyn ArtifactStore> = match &config.store.url {
            Some(url) => {
                info!(%url, "using remote artifact store");
                Arc::new(HttpArtifactStore::new(url)?.with_retention_days(retention))
            }
            None => {
                let cas = FsCasStore::new(config.store.artifacts_dir())
                    .context("Failed to open artifact blob store")?;
                let registry = SurrealArtifactRegistry::new(db);
                Arc::new(
                    LocalArtifactStore::new(Arc::new(cas), Arc::new(registry))
                        .with_retention_days(retention),
                )
            }
        };
        Ok(Self { ledger, store })
    }
}

async fn cmd_run(
    config: &PacklineConfig,
    trigger: Trigger,
    source: &str,
    keep_workspace: bool,
) -> Result<()> {
    let policy = TriggerPolicy::new(config.trigger.branch.clone());
    let request = policy
        .evaluate(&trigger, source, &GitResolver)
        .with_context(|| format!("acquisition failure: cannot resolve revision for {source}"))?;
    let Some(request) = request else {
        println!(
            "Ignored {}: runs are triggered by pushes to '{}'",
            trigger.describe(),
            config.trigger.branch
        );
        return Ok(());
    };

    let backends = Backends::open(config).await?;
    let workspace = match &config.workspace.parent {
        Some(parent) => Workspace::create_in(parent)?,
        None => Workspace::create()?,
    };
    let keep = keep_workspace || config.workspace.keep;

    let result = execute(config, &backends, &workspace, &request).await;

    if keep {
        let path = workspace.keep();
        println!("Workspace kept at {}", path.display());
    } else if let Err(e) = workspace.dispose() {
        warn!(error = %e, "failed to remove workspace");
    }

    let result = result?;
    report(&backends, &result).await
}

async fn execute(
    config: &PacklineConfig,
    backends: &Backends,
    workspace: &Workspace,
    request: &RunRequest,
) -> Result<PipelineResult> {
    let stages = plan_stages(config, workspace, request);
    let names: Vec<String> = stages.iter().map(|s| s.name.clone()).collect();
    let spec = PipelineSpec::new(request, &config.runtime.version, &names);

    println!("Packaging {} at {}", request.source, request.revision);
    println!("Trigger: {}", request.trigger.describe());
    println!("Workspace: {}", workspace.root().display());
    println!();

    let (handle, token) = cancel_pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let executor = LocalExecutor::new(backends.store.clone());
    let result =
        PackagingPipeline::run(backends.ledger.clone(), &executor, &spec, stages, &token).await;
    ctrl_c.abort();

    result.context("Pipeline failed to run")
}

fn stage_line(stage: &StageResult) -> String {
    let mark = if stage.passed() { "✓" } else { "✗" };
    let mut line = format!(
        "  {} {} ({}ms, exit code: {})",
        mark, stage.stage_name, stage.duration_ms, stage.exit_code
    );
    if let Some(kind) = stage.failure_kind() {
        line.push_str(&format!(" [{kind} failure]"));
    }
    line
}

/// Last `lines` lines of `text`.
fn tail_lines(text: &str, lines: usize) -> Vec<&str> {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].to_vec()
}

fn print_result(result: &PipelineResult) {
    let _span = RunSpan::enter(&result.run_id.0);

    println!("Run ID: {}", result.run_id);
    println!("State: {}", result.state);
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for stage in &result.stages {
        println!("{}", stage_line(stage));
    }
    println!();
    println!(
        "Summary: {}/{} stages passed",
        result.passed_count(),
        result.stages.len()
    );

    if let Some(failed) = result.failed_stage() {
        let output = if failed.stderr.trim().is_empty() {
            &failed.stdout
        } else {
            &failed.stderr
        };
        if !output.trim().is_empty() {
            println!();
            println!("Output of {}:", failed.stage_name);
            for line in tail_lines(output, 20) {
                println!("  | {line}");
            }
        }
    }

    if let Some(artifact) = &result.artifact {
        println!();
        println!(
            "Published '{}' ({} files, {} bytes)",
            artifact.name, artifact.file_count, artifact.total_bytes
        );
        println!("Manifest: {}", artifact.manifest_digest);
        if let Some(expires) = artifact.expires_at {
            println!("Expires: {}", expires.to_rfc3339());
        }
    }
}

async fn report(backends: &Backends, result: &PipelineResult) -> Result<()> {
    print_result(result);

    let events = backends.ledger.get_events(&result.run_id).await?;
    let verdict = RunGate::evaluate(&events);
    obs::emit_gate_evaluated(&result.run_id.0, verdict.passed, verdict.violations.len());
    println!();
    println!(
        "Gate: {}",
        if verdict.passed {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
    for violation in &verdict.violations {
        println!("  - {violation}");
    }

    if result.success() && verdict.passed {
        println!("\n✓ Published '{ARTIFACT_NAME}'");
        Ok(())
    } else {
        anyhow::bail!("run {} ended {}", result.run_id, result.state)
    }
}

async fn cmd_runs_list(backends: &Backends, spec: Option<&str>) -> Result<()> {
    let digest = spec
        .map(|s| ContentDigest::try_from(s.to_string()))
        .transpose()
        .context("Invalid spec digest")?;
    let runs = backends.ledger.list_runs(digest.as_ref()).await?;

    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {:<9}  {}  rev {}  spec {}",
            run.run_id,
            run.status,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.metadata.revision.as_deref().unwrap_or("-"),
            run.spec_digest.short(),
        );
    }
    Ok(())
}

async fn cmd_runs_show(backends: &Backends, run_id: &str) -> Result<()> {
    let run_id = RunId(run_id.to_string());
    let run = backends
        .ledger
        .get_run(&run_id)
        .await
        .with_context(|| format!("Run {run_id} not found"))?;
    let events = backends.ledger.get_events(&run_id).await?;

    println!("Run ID: {}", run.run_id);
    println!("Status: {}", run.status);
    println!("Pipeline: {}", run.metadata.pipeline);
    if let Some(revision) = &run.metadata.revision {
        println!("Revision: {revision}");
    }
    println!("Spec: {}", run.spec_digest);
    println!("Created: {}", run.created_at.to_rfc3339());
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed.to_rfc3339());
    }
    if let Some(summary) = &run.summary {
        println!("Duration: {}ms", summary.duration_ms);
    }
    println!();
    println!("Events:");
    for event in &events {
        let stage = event.payload["stage"].as_str().unwrap_or("");
        println!("  {:>3}  {:<20} {}", event.seq, event.kind, stage);
    }
    Ok(())
}

async fn cmd_artifacts_list(backends: &Backends, name: Option<&str>) -> Result<()> {
    let records = backends.store.list(name).await?;
    if records.is_empty() {
        println!("No artifacts published");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  run {}  {} files  {} bytes  {}",
            record.name,
            record.run_id,
            record.file_count,
            record.total_bytes,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn cmd_artifacts_fetch(
    backends: &Backends,
    run_id: &str,
    name: &str,
    out: &Path,
) -> Result<()> {
    let record = backends
        .store
        .find(name, &RunId(run_id.to_string()))
        .await
        .with_context(|| format!("No artifact '{name}' for run {run_id}"))?;
    let manifest = backends
        .store
        .fetch(&record, out)
        .await
        .context("Failed to restore artifact")?;
    println!(
        "Restored '{}' ({} files, {} bytes) to {}",
        manifest.name,
        manifest.entries.len(),
        manifest.total_bytes(),
        out.display()
    );
    Ok(())
}

async fn cmd_artifacts_prune(backends: &Backends) -> Result<()> {
    let report = backends.store.prune(Utc::now()).await?;
    for record in &report.removed {
        println!("Removed '{}' from run {}", record.name, record.run_id);
    }
    println!(
        "Pruned {} artifact(s), {} blob(s)",
        report.removed.len(),
        report.blobs_deleted
    );
    Ok(())
}
