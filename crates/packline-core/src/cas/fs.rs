use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{CasError, CasStore, Digest, Result};

/// Filesystem-backed content-addressed store with git-style 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
pub struct FsCasStore {
    objects_dir: PathBuf,
}

impl FsCasStore {
    /// Create a new `FsCasStore` rooted at `root`. Creates `root/objects/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

impl CasStore for FsCasStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::compute(data);
        let path = self.blob_path(&digest);

        if path.exists() {
            return Ok(digest);
        }

        let shard_dir = path.parent().unwrap_or(&self.objects_dir);
        fs::create_dir_all(shard_dir)?;

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(*digest)
            } else {
                CasError::Io(e)
            }
        })
    }

    fn exists(&self, digest: &Digest) -> Result<bool> {
        let path = self.blob_path(digest);
        Ok(path.exists())
    }

    fn delete(&self, digest: &Digest) -> Result<()> {
        match fs::remove_file(self.blob_path(digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CasError::Io(e)),
        }
    }

    fn list(&self) -> Result<Vec<Digest>> {
        let mut digests = Vec::new();
        for shard in fs::read_dir(&self.objects_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().to_string();
            for blob in fs::read_dir(shard.path())? {
                let blob = blob?;
                let rest = blob.file_name().to_string_lossy().to_string();
                // Leftover temp files from interrupted writes don't parse.
                if let Ok(digest) = format!("{prefix}{rest}").parse::<Digest>() {
                    digests.push(digest);
                }
            }
        }
        digests.sort();
        Ok(digests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsCasStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCasStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn blob_roundtrip() {
        let (_dir, store) = make_store();
        let data = b"hello world";
        let digest = store.put(data).unwrap();
        let got = store.get(&digest).unwrap();
        assert_eq!(got, data);
    }

    #[test]
    fn dedupe_invariant() {
        let (dir, store) = make_store();
        let data = b"duplicate me";
        let d1 = store.put(data).unwrap();
        let d2 = store.put(data).unwrap();
        assert_eq!(d1, d2);

        // Verify single file on disk.
        let hex = d1.to_hex();
        let shard = dir.path().join("objects").join(&hex[..2]);
        let entries: Vec<_> = std::fs::read_dir(shard).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn empty_blob() {
        let (_dir, store) = make_store();
        let digest = store.put(b"").unwrap();
        let got = store.get(&digest).unwrap();
        assert_eq!(got, b"");
    }

    #[test]
    fn get_nonexistent_returns_not_found() {
        let (_dir, store) = make_store();
        let fake = Digest::compute(b"no such blob");
        match store.get(&fake) {
            Err(CasError::NotFound(d)) => assert_eq!(d, fake),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn delete_then_missing() {
        let (_dir, store) = make_store();
        let digest = store.put(b"short lived").unwrap();
        assert!(store.exists(&digest).unwrap());
        store.delete(&digest).unwrap();
        assert!(!store.exists(&digest).unwrap());
        // Deleting twice is fine.
        store.delete(&digest).unwrap();
    }

    #[test]
    fn list_returns_every_blob() {
        let (_dir, store) = make_store();
        let a = store.put(b"a").unwrap();
        let b = store.put(b"b").unwrap();
        store.put(b"a").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list().unwrap(), expected);
    }

    #[test]
    fn list_empty_store() {
        let (_dir, store) = make_store();
        assert!(store.list().unwrap().is_empty());
    }
}
