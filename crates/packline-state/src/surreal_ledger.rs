//! SurrealDB-backed RunLedger implementation
//!
//! Uses `schema::RunRow` and `schema::RunEventRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::connection;
use crate::error::StorageError;
use crate::schema::{RunEventRow, RunRow};
use crate::storage_traits::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary,
    StorageResult,
};

fn backend(e: surrealdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// SurrealDB-backed implementation of [`RunLedger`].
#[derive(Clone)]
pub struct SurrealRunLedger {
    db: Surreal<Any>,
}

impl SurrealRunLedger {
    /// Wrap an already connected database handle.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(connection::connect_in_memory().await?))
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch a run row by ID, returning the DB row or RunNotFound.
    async fn fetch_run(&self, rid: &str) -> StorageResult<RunRow> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?;

        let rows: Vec<RunRow> = res.take(0).map_err(backend)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    /// Fetch a run row and verify it is in "running" state.
    async fn fetch_running(&self, rid: &str) -> StorageResult<RunRow> {
        let row = self.fetch_run(rid).await?;
        if row.status != RunStatus::Running.as_str() {
            return Err(StorageError::InvalidRunState {
                run_id: rid.to_string(),
                status: row.status,
                expected: "Running".to_string(),
            });
        }
        Ok(row)
    }

    async fn last_seq(&self, rid: &str) -> StorageResult<u64> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM run_events WHERE run_id = $rid ORDER BY seq DESC LIMIT 1")
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?;
        let rows: Vec<RunEventRow> = res.take(0).map_err(backend)?;
        Ok(rows.first().map(|r| r.seq).unwrap_or(0))
    }

    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        let row = self.fetch_running(&run_id.0).await?;

        let updated = row.finish(
            status.as_str(),
            summary.total_events,
            summary.artifact_digest.map(|d| d.as_str().to_string()),
            summary.duration_ms,
            summary.success,
        );
        let rid_owned = run_id.0.clone();

        self.db
            .query("UPDATE runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", updated))
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;

        Ok(())
    }

    /// Convert a `RunRow` into a `storage_traits::RunRecord`.
    fn row_to_record(row: RunRow) -> StorageResult<RunRecord> {
        let status: RunStatus = row.status.parse()?;

        let summary = if status != RunStatus::Running {
            let artifact_digest = row
                .artifact_digest
                .map(ContentDigest::try_from)
                .transpose()?;
            Some(RunSummary {
                total_events: row.total_events,
                artifact_digest,
                duration_ms: row.duration_ms,
                success: row.success,
            })
        } else {
            None
        };

        Ok(RunRecord {
            run_id: RunId(row.run_id),
            spec_digest: ContentDigest::try_from(row.spec_digest)?,
            metadata: RunMetadata {
                revision: row.revision,
                pipeline: row.pipeline,
                tags: row.tags,
            },
            status,
            summary,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }

    fn row_to_event(row: RunEventRow) -> RunEvent {
        RunEvent {
            seq: row.seq,
            kind: row.kind,
            payload: row.payload,
            timestamp: row.timestamp,
        }
    }
}

#[async_trait]
impl RunLedger for SurrealRunLedger {
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let row = RunRow::new(
            run_id.0.clone(),
            spec_digest.as_str().to_string(),
            metadata.revision,
            metadata.pipeline,
            metadata.tags,
        );

        debug!(run_id = %run_id, "creating run");

        let _created: Option<RunRow> = self
            .db
            .create("runs")
            .content(row)
            .await
            .map_err(backend)?;

        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        self.fetch_running(&run_id.0).await?;

        let last = self.last_seq(&run_id.0).await?;
        if event.seq <= last {
            return Err(StorageError::OutOfOrderEvent {
                run_id: run_id.0.clone(),
                seq: event.seq,
                last,
            });
        }

        let row = RunEventRow::new(
            run_id.0.clone(),
            event.seq,
            event.kind,
            event.payload,
            event.timestamp,
        );

        let _created: Option<RunEventRow> = self
            .db
            .create("run_events")
            .content(row)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Completed, summary).await
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Failed, summary).await
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.finish(run_id, RunStatus::Cancelled, summary).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let row = self.fetch_run(&run_id.0).await?;
        Self::row_to_record(row)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        self.fetch_run(&run_id.0).await?;

        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM run_events WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(backend)?;

        let rows: Vec<RunEventRow> = res.take(0).map_err(backend)?;

        Ok(rows.into_iter().map(Self::row_to_event).collect())
    }

    async fn list_runs(
        &self,
        spec_digest: Option<&ContentDigest>,
    ) -> StorageResult<Vec<RunRecord>> {
        let rows: Vec<RunRow> = if let Some(digest) = spec_digest {
            let sd = digest.as_str().to_string();
            let mut res = self
                .db
                .query("SELECT * FROM runs WHERE spec_digest = $sd ORDER BY created_at DESC")
                .bind(("sd", sd))
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM runs ORDER BY created_at DESC")
                .await
                .map_err(backend)?;
            res.take(0).map_err(backend)?
        };

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
