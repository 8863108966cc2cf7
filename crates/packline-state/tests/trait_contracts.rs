//! Trait contract tests for RunLedger and ArtifactRegistry.
//!
//! Every contract is checked against both the in-memory fakes and the
//! SurrealDB (mem://) backends; any conforming implementation must pass.

use chrono::{Duration, Utc};
use packline_state::fakes::{MemoryArtifactRegistry, MemoryRunLedger};
use packline_state::storage_traits::*;
use packline_state::{StorageError, SurrealArtifactRegistry, SurrealRunLedger};

fn sample_metadata() -> RunMetadata {
    RunMetadata {
        revision: Some("0123456789abcdef".to_string()),
        pipeline: "comic-reader-windows".to_string(),
        tags: serde_json::json!({ "trigger": "manual" }),
    }
}

fn event(seq: u64, kind: &str) -> RunEvent {
    RunEvent {
        seq,
        kind: kind.to_string(),
        payload: serde_json::json!({ "stage": "checkout" }),
        timestamp: Utc::now(),
    }
}

fn summary(success: bool) -> RunSummary {
    RunSummary {
        total_events: 2,
        artifact_digest: None,
        duration_ms: 42,
        success,
    }
}

fn artifact(name: &str, run_id: &RunId, expires_in_days: Option<i64>) -> ArtifactRecord {
    let now = Utc::now();
    ArtifactRecord {
        name: name.to_string(),
        run_id: run_id.clone(),
        manifest_digest: ContentDigest::from_bytes(b"manifest"),
        layout_digest: ContentDigest::from_bytes(b"layout"),
        file_count: 3,
        total_bytes: 1024,
        created_at: now,
        expires_at: expires_in_days.map(|d| now + Duration::days(d)),
    }
}

// ===========================================================================
// RunLedger contracts
// ===========================================================================

async fn check_create_and_get(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let id1 = ledger.create_run(&spec, sample_metadata()).await.unwrap();
    let id2 = ledger.create_run(&spec, sample_metadata()).await.unwrap();
    assert_ne!(id1, id2);

    let run = ledger.get_run(&id1).await.unwrap();
    assert_eq!(run.run_id, id1);
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.spec_digest, spec);
    assert_eq!(run.metadata.pipeline, "comic-reader-windows");
    assert!(run.summary.is_none());
}

async fn check_events_ordered(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();

    ledger.append_event(&run_id, event(1, "run_triggered")).await.unwrap();
    ledger.append_event(&run_id, event(2, "stage_started")).await.unwrap();
    ledger.append_event(&run_id, event(3, "stage_succeeded")).await.unwrap();

    let events = ledger.get_events(&run_id).await.unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(events[0].kind, "run_triggered");
}

async fn check_out_of_order_rejected(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();

    ledger.append_event(&run_id, event(1, "run_triggered")).await.unwrap();
    let err = ledger
        .append_event(&run_id, event(1, "stage_started"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::OutOfOrderEvent { .. }));
}

async fn check_terminal_runs_immutable(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();
    ledger.append_event(&run_id, event(1, "run_triggered")).await.unwrap();
    ledger.fail_run(&run_id, summary(false)).await.unwrap();

    let run = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.summary.as_ref().unwrap().success);
    assert!(run.completed_at.is_some());

    let err = ledger
        .append_event(&run_id, event(2, "stage_started"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));

    let err = ledger.complete_run(&run_id, summary(true)).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidRunState { .. }));
}

async fn check_cancel(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();
    ledger.cancel_run(&run_id, summary(false)).await.unwrap();

    let run = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
}

async fn check_complete_keeps_artifact_digest(ledger: &dyn RunLedger) {
    let spec = ContentDigest::from_bytes(b"spec");
    let run_id = ledger.create_run(&spec, sample_metadata()).await.unwrap();
    let digest = ContentDigest::from_bytes(b"manifest");
    ledger
        .complete_run(
            &run_id,
            RunSummary {
                total_events: 0,
                artifact_digest: Some(digest.clone()),
                duration_ms: 5,
                success: true,
            },
        )
        .await
        .unwrap();

    let run = ledger.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.summary.unwrap().artifact_digest, Some(digest));
}

async fn check_unknown_run(ledger: &dyn RunLedger) {
    let missing = RunId::new();
    assert!(matches!(
        ledger.get_run(&missing).await.unwrap_err(),
        StorageError::RunNotFound { .. }
    ));
    assert!(matches!(
        ledger.get_events(&missing).await.unwrap_err(),
        StorageError::RunNotFound { .. }
    ));
}

async fn check_list_filters_by_spec(ledger: &dyn RunLedger) {
    let spec_a = ContentDigest::from_bytes(b"spec-a");
    let spec_b = ContentDigest::from_bytes(b"spec-b");
    ledger.create_run(&spec_a, sample_metadata()).await.unwrap();
    ledger.create_run(&spec_a, sample_metadata()).await.unwrap();
    ledger.create_run(&spec_b, sample_metadata()).await.unwrap();

    assert_eq!(ledger.list_runs(Some(&spec_a)).await.unwrap().len(), 2);
    assert_eq!(ledger.list_runs(Some(&spec_b)).await.unwrap().len(), 1);
    assert_eq!(ledger.list_runs(None).await.unwrap().len(), 3);
}

// ===========================================================================
// ArtifactRegistry contracts
// ===========================================================================

async fn check_register_and_get(registry: &dyn ArtifactRegistry) {
    let run_id = RunId::new();
    let record = artifact("Comic Reader Windows", &run_id, None);
    registry.register(record.clone()).await.unwrap();

    let got = registry.get("Comic Reader Windows", &run_id).await.unwrap();
    assert_eq!(got.manifest_digest, record.manifest_digest);
    assert_eq!(got.file_count, 3);
    assert_eq!(got.total_bytes, 1024);
}

async fn check_duplicate_rejected(registry: &dyn ArtifactRegistry) {
    let run_id = RunId::new();
    registry
        .register(artifact("Comic Reader Windows", &run_id, None))
        .await
        .unwrap();
    let err = registry
        .register(artifact("Comic Reader Windows", &run_id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateArtifact { .. }));
}

async fn check_missing_artifact(registry: &dyn ArtifactRegistry) {
    let err = registry
        .get("Comic Reader Windows", &RunId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ArtifactNotFound { .. }));
}

async fn check_list_and_remove(registry: &dyn ArtifactRegistry) {
    let r1 = RunId::new();
    let r2 = RunId::new();
    registry.register(artifact("Comic Reader Windows", &r1, None)).await.unwrap();
    registry.register(artifact("Comic Reader Windows", &r2, None)).await.unwrap();
    registry.register(artifact("other", &r1, None)).await.unwrap();

    assert_eq!(registry.list(Some("Comic Reader Windows")).await.unwrap().len(), 2);
    assert_eq!(registry.list(None).await.unwrap().len(), 3);

    registry.remove("Comic Reader Windows", &r1).await.unwrap();
    assert_eq!(registry.list(Some("Comic Reader Windows")).await.unwrap().len(), 1);

    // Removing again is a no-op.
    registry.remove("Comic Reader Windows", &r1).await.unwrap();
}

async fn check_expired(registry: &dyn ArtifactRegistry) {
    let keep = RunId::new();
    let old = RunId::new();
    registry.register(artifact("a", &keep, Some(30))).await.unwrap();
    registry.register(artifact("a", &old, Some(1))).await.unwrap();
    registry.register(artifact("b", &old, None)).await.unwrap();

    let expired = registry.expired(Utc::now() + Duration::days(2)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].run_id, old);
    assert_eq!(expired[0].name, "a");
}

// ===========================================================================
// Memory backends
// ===========================================================================

#[tokio::test]
async fn memory_ledger_contracts() {
    check_create_and_get(&MemoryRunLedger::new()).await;
    check_events_ordered(&MemoryRunLedger::new()).await;
    check_out_of_order_rejected(&MemoryRunLedger::new()).await;
    check_terminal_runs_immutable(&MemoryRunLedger::new()).await;
    check_cancel(&MemoryRunLedger::new()).await;
    check_complete_keeps_artifact_digest(&MemoryRunLedger::new()).await;
    check_unknown_run(&MemoryRunLedger::new()).await;
    check_list_filters_by_spec(&MemoryRunLedger::new()).await;
}

#[tokio::test]
async fn memory_registry_contracts() {
    check_register_and_get(&MemoryArtifactRegistry::new()).await;
    check_duplicate_rejected(&MemoryArtifactRegistry::new()).await;
    check_missing_artifact(&MemoryArtifactRegistry::new()).await;
    check_list_and_remove(&MemoryArtifactRegistry::new()).await;
    check_expired(&MemoryArtifactRegistry::new()).await;
}

// ===========================================================================
// SurrealDB backends (mem://)
// ===========================================================================

mod surreal {
    use super::*;

    async fn ledger() -> SurrealRunLedger {
        SurrealRunLedger::in_memory().await.expect("in_memory() failed")
    }

    async fn registry() -> SurrealArtifactRegistry {
        SurrealArtifactRegistry::in_memory()
            .await
            .expect("in_memory() failed")
    }

    #[tokio::test]
    async fn create_and_get() {
        check_create_and_get(&ledger().await).await;
    }

    #[tokio::test]
    async fn events_ordered() {
        check_events_ordered(&ledger().await).await;
    }

    #[tokio::test]
    async fn out_of_order_rejected() {
        check_out_of_order_rejected(&ledger().await).await;
    }

    #[tokio::test]
    async fn terminal_runs_immutable() {
        check_terminal_runs_immutable(&ledger().await).await;
    }

    #[tokio::test]
    async fn cancel() {
        check_cancel(&ledger().await).await;
    }

    #[tokio::test]
    async fn complete_keeps_artifact_digest() {
        check_complete_keeps_artifact_digest(&ledger().await).await;
    }

    #[tokio::test]
    async fn unknown_run() {
        check_unknown_run(&ledger().await).await;
    }

    #[tokio::test]
    async fn list_filters_by_spec() {
        check_list_filters_by_spec(&ledger().await).await;
    }

    #[tokio::test]
    async fn register_and_get() {
        check_register_and_get(&registry().await).await;
    }

    #[tokio::test]
    async fn duplicate_rejected() {
        check_duplicate_rejected(&registry().await).await;
    }

    #[tokio::test]
    async fn missing_artifact() {
        check_missing_artifact(&registry().await).await;
    }

    #[tokio::test]
    async fn list_and_remove() {
        check_list_and_remove(&registry().await).await;
    }

    #[tokio::test]
    async fn expired() {
        check_expired(&registry().await).await;
    }
}
