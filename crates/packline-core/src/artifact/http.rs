use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use packline_state::{ArtifactRecord, RunId, StorageError};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    collect_files, restore_file, ArtifactError, ArtifactManifest, ArtifactStore, ManifestEntry,
    PruneReport, Result,
};
use crate::cas::Digest;

/// Body of `PUT/GET {base}/artifacts/{name}/{run_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub record: ArtifactRecord,
    pub manifest: ArtifactManifest,
}

/// Artifact store reached over HTTP.
///
/// Endpoints, relative to `base`:
/// - `PUT  blobs/{digest}`: raw file contents
/// - `GET  blobs/{digest}`
/// - `PUT  artifacts/{name}/{run_id}`: [`PublishedArtifact`] as JSON
/// - `GET  artifacts/{name}/{run_id}`
/// - `GET  artifacts?name={name}`: list of records, newest first
pub struct HttpArtifactStore {
    client: reqwest::Client,
    base: Url,
    retention: Option<Duration>,
}

impl HttpArtifactStore {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| ArtifactError::Transport(format!("invalid store url {base}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("packline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            retention: None,
        })
    }

    /// Keep artifacts for `days`; 0 keeps them forever.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention = (days > 0).then(|| Duration::days(i64::from(days)));
        self
    }

    /// `base` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ArtifactError::Transport(format!("store url cannot be a base: {}", self.base)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn put_blob(&self, digest: &Digest, data: Vec<u8>) -> Result<()> {
        let url = self.endpoint(&["blobs", &digest.to_hex()])?;
        let response = self.client.put(url).body(data).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let url = self.endpoint(&["blobs", &digest.to_hex()])?;
        let response = check_status(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_published(&self, name: &str, run_id: &RunId) -> Result<PublishedArtifact> {
        let url = self.endpoint(&["artifacts", name, &run_id.0])?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::ArtifactNotFound {
                name: name.to_string(),
                run_id: run_id.0.clone(),
            }
            .into());
        }
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    Err(ArtifactError::Transport(format!(
        "{status} from {url}: {}",
        body.trim()
    )))
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(&self, name: &str, run_id: &RunId, source: &Path) -> Result<ArtifactRecord> {
        let source = source.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&source))
            .await
            .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))??;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let data = tokio::fs::read(&file.abs_path).await?;
            let digest = Digest::compute(&data);
            let size = data.len() as u64;
            debug!(path = %file.rel_path, digest = %digest, size, "uploading blob");
            self.put_blob(&digest, data).await?;
            entries.push(ManifestEntry {
                path: file.rel_path,
                digest,
                size,
                executable: file.executable,
            });
        }

        let manifest = ArtifactManifest::new(name, entries);
        let manifest_digest = Digest::compute(&manifest.to_bytes()?);
        let record = manifest.record(run_id, manifest_digest, Utc::now(), self.retention);

        let url = self.endpoint(&["artifacts", name, &run_id.0])?;
        let body = PublishedArtifact {
            record: record.clone(),
            manifest,
        };
        check_status(self.client.put(url).json(&body).send().await?).await?;

        info!(
            artifact = %record.name,
            run_id = %record.run_id,
            store = %self.base,
            files = record.file_count,
            "artifact uploaded"
        );
        Ok(record)
    }

    async fn fetch(&self, record: &ArtifactRecord, dest: &Path) -> Result<ArtifactManifest> {
        let published = self.get_published(&record.name, &record.run_id).await?;
        let manifest = published.manifest;
        tokio::fs::create_dir_all(dest).await?;
        for entry in manifest.entries.iter().cloned() {
            let bytes = self.get_blob(&entry.digest).await?;
            let dest = dest.to_path_buf();
            tokio::task::spawn_blocking(move || restore_file(&dest, &entry, &bytes))
                .await
                .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))??;
        }
        Ok(manifest)
    }

    async fn list(&self, name: Option<&str>) -> Result<Vec<ArtifactRecord>> {
        let mut url = self.endpoint(&["artifacts"])?;
        if let Some(name) = name {
            url.query_pairs_mut().append_pair("name", name);
        }
        Ok(check_status(self.client.get(url).send().await?)
            .await?
            .json()
            .await?)
    }

    async fn find(&self, name: &str, run_id: &RunId) -> Result<ArtifactRecord> {
        Ok(self.get_published(name, run_id).await?.record)
    }

    async fn prune(&self, _now: DateTime<Utc>) -> Result<PruneReport> {
        Err(ArtifactError::Unsupported(
            "retention is enforced by the remote store",
        ))
    }
}
