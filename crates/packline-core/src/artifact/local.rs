use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use packline_state::{ArtifactRecord, ArtifactRegistry, RunId};
use tracing::{info, warn};

use super::{
    collect_files, restore_file, ArtifactError, ArtifactManifest, ArtifactStore, ManifestEntry,
    PruneReport, Result,
};
use crate::cas::{CasError, CasStore, Digest};

/// Artifact store backed by a local content-addressed blob store and an
/// artifact registry.
pub struct LocalArtifactStore {
    cas: Arc<dyn CasStore>,
    registry: Arc<dyn ArtifactRegistry>,
    retention: Option<Duration>,
}

impl LocalArtifactStore {
    pub fn new(cas: Arc<dyn CasStore>, registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self {
            cas,
            registry,
            retention: None,
        }
    }

    /// Keep artifacts for `days`; 0 keeps them forever.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention = (days > 0).then(|| Duration::days(i64::from(days)));
        self
    }
}

fn join_error(err: tokio::task::JoinError) -> ArtifactError {
    ArtifactError::Io(std::io::Error::other(err))
}

fn ingest(cas: &dyn CasStore, name: &str, source: &Path) -> Result<(ArtifactManifest, Digest)> {
    let files = collect_files(source)?;
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let data = std::fs::read(&file.abs_path)?;
        let digest = cas.put(&data)?;
        entries.push(ManifestEntry {
            path: file.rel_path,
            digest,
            size: data.len() as u64,
            executable: file.executable,
        });
    }
    let manifest = ArtifactManifest::new(name, entries);
    let manifest_digest = cas.put(&manifest.to_bytes()?)?;
    Ok((manifest, manifest_digest))
}

fn load_manifest(cas: &dyn CasStore, digest: &Digest) -> Result<ArtifactManifest> {
    let bytes = cas.get(digest)?;
    let actual = Digest::compute(&bytes);
    if actual != *digest {
        return Err(ArtifactError::Corrupt {
            path: "manifest".to_string(),
            expected: *digest,
            actual,
        });
    }
    ArtifactManifest::from_bytes(&bytes)
}

fn restore(cas: &dyn CasStore, manifest_digest: &Digest, dest: &Path) -> Result<ArtifactManifest> {
    let manifest = load_manifest(cas, manifest_digest)?;
    std::fs::create_dir_all(dest)?;
    for entry in &manifest.entries {
        let bytes = cas.get(&entry.digest)?;
        restore_file(dest, entry, &bytes)?;
    }
    Ok(manifest)
}

/// Delete every blob not reachable from `live` manifests.
fn collect_garbage(cas: &dyn CasStore, live: &[Digest]) -> Result<usize> {
    let mut referenced = BTreeSet::new();
    for manifest_digest in live {
        referenced.insert(*manifest_digest);
        match load_manifest(cas, manifest_digest) {
            Ok(manifest) => referenced.extend(manifest.blob_digests()),
            Err(ArtifactError::Cas(CasError::NotFound(d))) => {
                warn!(manifest = %d, "registered artifact has no manifest blob");
            }
            Err(e) => return Err(e),
        }
    }

    let mut deleted = 0;
    for digest in cas.list()? {
        if !referenced.contains(&digest) {
            cas.delete(&digest)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(&self, name: &str, run_id: &RunId, source: &Path) -> Result<ArtifactRecord> {
        let cas = Arc::clone(&self.cas);
        let owned_name = name.to_string();
        let source: PathBuf = source.to_path_buf();
        let (manifest, manifest_digest) =
            tokio::task::spawn_blocking(move || ingest(cas.as_ref(), &owned_name, &source))
                .await
                .map_err(join_error)??;

        let record = manifest.record(run_id, manifest_digest, Utc::now(), self.retention);
        self.registry.register(record.clone()).await?;

        info!(
            artifact = %record.name,
            run_id = %record.run_id,
            manifest = %record.manifest_digest.short(),
            files = record.file_count,
            bytes = record.total_bytes,
            "artifact uploaded"
        );
        Ok(record)
    }

    async fn fetch(&self, record: &ArtifactRecord, dest: &Path) -> Result<ArtifactManifest> {
        let cas = Arc::clone(&self.cas);
        let manifest_digest = Digest::try_from(&record.manifest_digest)?;
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || restore(cas.as_ref(), &manifest_digest, &dest))
            .await
            .map_err(join_error)?
    }

    async fn list(&self, name: Option<&str>) -> Result<Vec<ArtifactRecord>> {
        Ok(self.registry.list(name).await?)
    }

    async fn find(&self, name: &str, run_id: &RunId) -> Result<ArtifactRecord> {
        Ok(self.registry.get(name, run_id).await?)
    }

    async fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport> {
        let expired = self.registry.expired(now).await?;
        for record in &expired {
            self.registry.remove(&record.name, &record.run_id).await?;
        }

        let live = self
            .registry
            .list(None)
            .await?
            .iter()
            .map(|r| Digest::try_from(&r.manifest_digest))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let cas = Arc::clone(&self.cas);
        let blobs_deleted = tokio::task::spawn_blocking(move || collect_garbage(cas.as_ref(), &live))
            .await
            .map_err(join_error)??;

        info!(
            removed = expired.len(),
            blobs_deleted, "artifact retention sweep finished"
        );
        Ok(PruneReport {
            removed: expired,
            blobs_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::fs::FsCasStore;
    use packline_state::fakes::MemoryArtifactRegistry;
    use packline_state::StorageError;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        cas: Arc<FsCasStore>,
        store: LocalArtifactStore,
    }

    fn fixture(retention_days: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("artifacts");
        let cas = Arc::new(FsCasStore::new(&root).unwrap());
        let store = LocalArtifactStore::new(cas.clone(), Arc::new(MemoryArtifactRegistry::new()))
            .with_retention_days(retention_days);
        Fixture {
            _dir: dir,
            root,
            cas,
            store,
        }
    }

    fn bundle(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("_internal")).unwrap();
        std::fs::write(dir.path().join("Comic Reader.exe"), contents).unwrap();
        std::fs::write(dir.path().join("_internal/base_library.zip"), b"stdlib").unwrap();
        dir
    }

    #[tokio::test]
    async fn upload_then_fetch_restores_tree() {
        let fx = fixture(0);
        let src = bundle("MZ build");
        let run = RunId::new();

        let record = fx
            .store
            .upload("Comic Reader Windows", &run, src.path())
            .await
            .unwrap();
        assert_eq!(record.name, "Comic Reader Windows");
        assert_eq!(record.file_count, 2);
        assert_eq!(record.expires_at, None);

        let found = fx.store.find("Comic Reader Windows", &run).await.unwrap();
        assert_eq!(found, record);

        let out = tempfile::tempdir().unwrap();
        let manifest = fx.store.fetch(&record, out.path()).await.unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(
            std::fs::read_to_string(out.path().join("Comic Reader.exe")).unwrap(),
            "MZ build"
        );
        assert_eq!(
            std::fs::read(out.path().join("_internal/base_library.zip")).unwrap(),
            b"stdlib"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_library_survives_round_trip() {
        let fx = fixture(0);
        let src = bundle("MZ build");
        std::fs::create_dir_all(src.path().join("real")).unwrap();
        std::fs::write(src.path().join("real/lib.so"), b"shared object").unwrap();
        std::os::unix::fs::symlink("real/lib.so", src.path().join("lib.so")).unwrap();
        let run = RunId::new();

        let record = fx
            .store
            .upload("Comic Reader Windows", &run, src.path())
            .await
            .unwrap();
        assert_eq!(record.file_count, 4);

        let out = tempfile::tempdir().unwrap();
        fx.store.fetch(&record, out.path()).await.unwrap();
        assert_eq!(
            std::fs::read(out.path().join("lib.so")).unwrap(),
            b"shared object"
        );
        assert_eq!(
            std::fs::read(out.path().join("real/lib.so")).unwrap(),
            b"shared object"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn upload_rejects_escaping_symlink() {
        let fx = fixture(0);
        let src = bundle("MZ build");
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("key"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path().join("key"), src.path().join("key")).unwrap();

        let err = fx
            .store
            .upload("Comic Reader Windows", &RunId::new(), src.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::LinkEscapesRoot(_)));
        assert!(fx.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_missing_directory_fails() {
        let fx = fixture(0);
        let err = fx
            .store
            .upload("a", &RunId::new(), Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::MissingPath(_)));
        assert!(fx.store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeat_uploads_share_layout_and_blobs() {
        let fx = fixture(0);
        let first = fx
            .store
            .upload("a", &RunId::new(), bundle("same").path())
            .await
            .unwrap();
        let second = fx
            .store
            .upload("a", &RunId::new(), bundle("same").path())
            .await
            .unwrap();

        assert_eq!(first.layout_digest, second.layout_digest);
        assert_eq!(first.manifest_digest, second.manifest_digest);
        // Two file blobs and one manifest.
        assert_eq!(fx.cas.list().unwrap().len(), 3);
        assert_eq!(fx.store.list(Some("a")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_detects_tampered_blob() {
        let fx = fixture(0);
        let record = fx
            .store
            .upload("a", &RunId::new(), bundle("original").path())
            .await
            .unwrap();

        let exe = Digest::compute(b"original");
        let hex = exe.to_hex();
        let blob = fx.root.join("objects").join(&hex[..2]).join(&hex[2..]);
        std::fs::write(&blob, b"tampered").unwrap();

        let out = tempfile::tempdir().unwrap();
        let err = fx.store.fetch(&record, out.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn prune_drops_expired_and_collects_unreferenced_blobs() {
        let fx = fixture(30);
        let old = fx
            .store
            .upload("a", &RunId::new(), bundle("old build").path())
            .await
            .unwrap();
        assert!(old.expires_at.is_some());

        // Nothing has expired yet.
        let report = fx.store.prune(Utc::now()).await.unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.blobs_deleted, 0);

        let later = Utc::now() + Duration::days(31);
        let report = fx.store.prune(later).await.unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.blobs_deleted, 3);
        assert!(fx.cas.list().unwrap().is_empty());

        let err = fx.store.find("a", &old.run_id).await.unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::Storage(StorageError::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn prune_keeps_blobs_shared_with_live_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cas = Arc::new(FsCasStore::new(dir.path()).unwrap());
        let registry: Arc<dyn ArtifactRegistry> = Arc::new(MemoryArtifactRegistry::new());
        let short_lived = LocalArtifactStore::new(cas.clone(), registry.clone()).with_retention_days(1);
        let forever = LocalArtifactStore::new(cas.clone(), registry.clone());

        short_lived
            .upload("a", &RunId::new(), bundle("v1").path())
            .await
            .unwrap();
        let kept = forever
            .upload("a", &RunId::new(), bundle("v2").path())
            .await
            .unwrap();

        let report = forever
            .prune(Utc::now() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(report.removed.len(), 1);
        // v1's executable and manifest go; the shared zip stays.
        assert_eq!(report.blobs_deleted, 2);
        assert_eq!(cas.list().unwrap().len(), 3);

        let out = tempfile::tempdir().unwrap();
        forever.fetch(&kept, out.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(out.path().join("Comic Reader.exe")).unwrap(),
            "v2"
        );
    }
}
