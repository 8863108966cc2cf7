//! SurrealDB schema migrations and initialization
//!
//! Sets up the `runs`, `run_events` and `artifacts` tables with their
//! uniqueness constraints and lookup indexes.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all packline tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing packline SurrealDB schema");

    init_runs_table(db).await?;
    init_run_events_table(db).await?;
    init_artifacts_table(db).await?;

    info!("packline schema initialization complete");
    Ok(())
}

/// Initialize `runs` table
///
/// Schema:
/// ```text
/// TABLE runs {
///   run_id:          STRING (unique)
///   spec_digest:     STRING (indexed)
///   revision:        STRING?
///   pipeline:        STRING
///   tags:            OBJECT
///   status:          STRING (running | completed | failed | cancelled)
///   total_events:    INT
///   artifact_digest: STRING?
///   duration_ms:     INT
///   success:         BOOL
///   created_at:      DATETIME (indexed)
///   completed_at:    DATETIME?
/// }
/// ```
///
/// Status transitions (running → terminal, once) are enforced in the ledger.
async fn init_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_spec_digest ON TABLE runs COLUMNS spec_digest;
        DEFINE INDEX IF NOT EXISTS idx_revision ON TABLE runs COLUMNS revision;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE runs COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ runs table initialized");
    Ok(())
}

/// Initialize `run_events` table
///
/// `(run_id, seq)` is unique; `seq` is 1-indexed and monotonically
/// increasing within a run.
async fn init_run_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing run_events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS run_events SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id_seq ON TABLE run_events COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_event_run_id ON TABLE run_events COLUMNS run_id;
        DEFINE INDEX IF NOT EXISTS idx_kind ON TABLE run_events COLUMNS kind;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ run_events table initialized");
    Ok(())
}

/// Initialize `artifacts` table
///
/// `(name, run_id)` is unique; `expires_at` is indexed for retention sweeps.
async fn init_artifacts_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing artifacts table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS artifacts SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_name_run ON TABLE artifacts COLUMNS name, run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_artifact_name ON TABLE artifacts COLUMNS name;
        DEFINE INDEX IF NOT EXISTS idx_expires_at ON TABLE artifacts COLUMNS expires_at;
    "#;

    db.query(sql).await?.check()?;
    info!("✓ artifacts table initialized");
    Ok(())
}
