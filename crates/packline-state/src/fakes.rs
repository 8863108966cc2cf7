//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRunLedger` and `MemoryArtifactRegistry` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

impl RunState {
    fn ensure_running(&self) -> StorageResult<()> {
        if self.record.status != RunStatus::Running {
            return Err(StorageError::InvalidRunState {
                run_id: self.record.run_id.0.clone(),
                status: format!("{:?}", self.record.status),
                expected: "Running".to_string(),
            });
        }
        Ok(())
    }

    fn finish(&mut self, status: RunStatus, summary: RunSummary) -> StorageResult<()> {
        self.ensure_running()?;
        self.record.status = status;
        self.record.summary = Some(summary);
        self.record.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        f(state)
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(
        &self,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let record = RunRecord {
            run_id: run_id.clone(),
            spec_digest: spec_digest.clone(),
            metadata,
            status: RunStatus::Running,
            summary: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        self.with_run(run_id, |state| {
            state.ensure_running()?;
            let last = state.events.last().map(|e| e.seq).unwrap_or(0);
            if event.seq <= last {
                return Err(StorageError::OutOfOrderEvent {
                    run_id: run_id.0.clone(),
                    seq: event.seq,
                    last,
                });
            }
            state.events.push(event);
            Ok(())
        })
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Completed, summary))
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Failed, summary))
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Cancelled, summary))
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_run(run_id, |state| Ok(state.record.clone()))
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        self.with_run(run_id, |state| Ok(state.events.clone()))
    }

    async fn list_runs(
        &self,
        spec_digest: Option<&ContentDigest>,
    ) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|s| spec_digest.map_or(true, |d| &s.record.spec_digest == d))
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactRegistry
// ---------------------------------------------------------------------------

/// In-memory artifact registry keyed by `(name, run_id)`.
#[derive(Debug, Default)]
pub struct MemoryArtifactRegistry {
    records: Mutex<Vec<ArtifactRecord>>,
}

impl MemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactRegistry for MemoryArtifactRegistry {
    async fn register(&self, record: ArtifactRecord) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.name == record.name && r.run_id == record.run_id)
        {
            return Err(StorageError::DuplicateArtifact {
                name: record.name,
                run_id: record.run_id.0,
            });
        }
        records.push(record);
        Ok(())
    }

    async fn get(&self, name: &str, run_id: &RunId) -> StorageResult<ArtifactRecord> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .find(|r| r.name == name && &r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StorageError::ArtifactNotFound {
                name: name.to_string(),
                run_id: run_id.0.clone(),
            })
    }

    async fn list(&self, name: Option<&str>) -> StorageResult<Vec<ArtifactRecord>> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<ArtifactRecord> = records
            .iter()
            .filter(|r| name.map_or(true, |n| r.name == n))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn remove(&self, name: &str, run_id: &RunId) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        records.retain(|r| !(r.name == name && &r.run_id == run_id));
        Ok(())
    }
}
