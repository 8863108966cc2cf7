//! SurrealDB-backed ArtifactRegistry implementation

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::connection;
use crate::error::StorageError;
use crate::schema::ArtifactRow;
use crate::storage_traits::{
    ArtifactRecord, ArtifactRegistry, ContentDigest, RunId, StorageResult,
};

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// SurrealDB-backed implementation of [`ArtifactRegistry`].
#[derive(Clone)]
pub struct SurrealArtifactRegistry {
    db: Surreal<Any>,
}

impl SurrealArtifactRegistry {
    /// Wrap an already connected database handle.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(connection::connect_in_memory().await?))
    }

    async fn find(&self, name: &str, run_id: &RunId) -> StorageResult<Option<ArtifactRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM artifacts WHERE name = $name AND run_id = $rid")
            .bind(("name", name.to_string()))
            .bind(("rid", run_id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<ArtifactRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    fn row_to_record(row: ArtifactRow) -> StorageResult<ArtifactRecord> {
        Ok(ArtifactRecord {
            name: row.name,
            run_id: RunId(row.run_id),
            manifest_digest: ContentDigest::try_from(row.manifest_digest)?,
            layout_digest: ContentDigest::try_from(row.layout_digest)?,
            file_count: row.file_count,
            total_bytes: row.total_bytes,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[async_trait]
impl ArtifactRegistry for SurrealArtifactRegistry {
    async fn register(&self, record: ArtifactRecord) -> StorageResult<()> {
        if self.find(&record.name, &record.run_id).await?.is_some() {
            return Err(StorageError::DuplicateArtifact {
                name: record.name,
                run_id: record.run_id.0,
            });
        }

        debug!(name = %record.name, run_id = %record.run_id, "registering artifact");

        let row = ArtifactRow {
            id: None,
            name: record.name,
            run_id: record.run_id.0,
            manifest_digest: record.manifest_digest.as_str().to_string(),
            layout_digest: record.layout_digest.as_str().to_string(),
            file_count: record.file_count,
            total_bytes: record.total_bytes,
            created_at: record.created_at,
            expires_at: record.expires_at,
        };

        let _created: Option<ArtifactRow> = self
            .db
            .create("artifacts")
            .content(row)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get(&self, name: &str, run_id: &RunId) -> StorageResult<ArtifactRecord> {
        let row = self
            .find(name, run_id)
            .await?
            .ok_or_else(|| StorageError::ArtifactNotFound {
                name: name.to_string(),
                run_id: run_id.0.clone(),
            })?;
        Self::row_to_record(row)
    }

    async fn list(&self, name: Option<&str>) -> StorageResult<Vec<ArtifactRecord>> {
        let rows: Vec<ArtifactRow> = if let Some(name) = name {
            let mut res = self
                .db
                .query("SELECT * FROM artifacts WHERE name = $name ORDER BY created_at DESC")
                .bind(("name", name.to_string()))
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM artifacts ORDER BY created_at DESC")
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn remove(&self, name: &str, run_id: &RunId) -> StorageResult<()> {
        self.db
            .query("DELETE artifacts WHERE name = $name AND run_id = $rid")
            .bind(("name", name.to_string()))
            .bind(("rid", run_id.0.clone()))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }
}
