//! SurrealDB connection setup shared by the ledger and artifact registry.
//!
//! Supports in-memory (`mem://`), embedded file (`surrealkv://<dir>`) and
//! remote (`ws://`, `wss://`) endpoints through the `any` engine.

use std::path::Path;

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::info;

use crate::error::StateError;
use crate::migrations;
use crate::Result;

/// Namespace every packline table lives in.
pub const NAMESPACE: &str = "packline";
/// Database name inside [`NAMESPACE`].
pub const DATABASE: &str = "main";

/// Connect to `url`, select the packline namespace and initialise the schema.
pub async fn connect(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(NAMESPACE)
        .use_db(DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

    info!("SurrealDB connected ({})", url);
    Ok(db)
}

/// Connect to a fresh in-memory database (tests, dry runs).
pub async fn connect_in_memory() -> Result<Surreal<Any>> {
    connect("mem://").await
}

/// Connect to the embedded on-disk database under `state_dir/db`.
pub async fn connect_local(state_dir: &Path) -> Result<Surreal<Any>> {
    let path = state_dir.join("db");
    std::fs::create_dir_all(&path).map_err(|e| {
        StateError::Connection(format!(
            "Failed to create database directory {}: {}",
            path.display(),
            e
        ))
    })?;
    connect(&format!("surrealkv://{}", path.display())).await
}
