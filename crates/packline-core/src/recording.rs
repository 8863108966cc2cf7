//! Run recorder: writes a pipeline run's events to a [`RunLedger`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use packline_state::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunStatus, RunSummary, StorageResult,
};

/// Records the events of a single run, assigning sequence numbers.
///
/// 1. [`RunRecorder::start`] creates the run.
/// 2. [`RunRecorder::record`] appends events with `seq` 1, 2, 3, ...
/// 3. [`RunRecorder::finish`] moves the run to its terminal status.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    last_seq: AtomicU64,
}

impl RunRecorder {
    /// Start a new run in the ledger, returning a recorder bound to that run.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        spec_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<Self> {
        let run_id = ledger.create_run(spec_digest, metadata.clone()).await?;
        crate::obs::emit_run_started(
            run_id.0.as_str(),
            &metadata.pipeline,
            metadata.revision.as_deref(),
        );
        Ok(Self {
            ledger,
            run_id,
            last_seq: AtomicU64::new(0),
        })
    }

    /// Append an event of `kind`, returning its sequence number.
    pub async fn record(&self, kind: &str, payload: serde_json::Value) -> StorageResult<u64> {
        let seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = RunEvent {
            seq,
            kind: kind.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        self.ledger.append_event(&self.run_id, event).await?;
        crate::obs::emit_event_appended(&self.run_id.0, kind, seq);
        Ok(seq)
    }

    /// Number of events recorded so far.
    pub fn events_recorded(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Finalize the run with `status`. `Running` is not a terminal status and
    /// is treated as failed.
    pub async fn finish(self, status: RunStatus, summary: RunSummary) -> StorageResult<()> {
        crate::obs::emit_run_finished(
            &self.run_id.0,
            status.as_str(),
            summary.duration_ms,
            summary.total_events,
        );
        match status {
            RunStatus::Completed => self.ledger.complete_run(&self.run_id, summary).await,
            RunStatus::Cancelled => self.ledger.cancel_run(&self.run_id, summary).await,
            RunStatus::Failed | RunStatus::Running => {
                self.ledger.fail_run(&self.run_id, summary).await
            }
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}
