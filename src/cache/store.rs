//! Physical content store keyed by SHA-256

use super::DEPS_DIR;
use crate::checksum::{self, ChecksumInfo, Verification};
use crate::error::{HermitError, HermitResult};
use crate::request::Mode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const STORE_DIR: &str = ".store";

/// Blob store under `<output>/deps/.store`
#[derive(Debug, Clone)]
pub struct ContentStore {
    store_root: PathBuf,
}

impl ContentStore {
    /// Create a store for the given output directory
    pub fn new(output_root: &Path) -> Self {
        Self {
            store_root: output_root.join(DEPS_DIR).join(STORE_DIR),
        }
    }

    /// Directory of committed blobs
    pub fn blobs_dir(&self) -> PathBuf {
        self.store_root.join("sha256")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.store_root.join("tmp")
    }

    /// Final path of a blob, whether or not it exists
    pub fn blob_path(&self, sha256: &str) -> PathBuf {
        self.blobs_dir().join(sha256)
    }

    /// Whether a blob is already committed
    pub fn contains(&self, sha256: &str) -> bool {
        self.blob_path(sha256).is_file()
    }

    /// Reserve a fresh temporary path on the same filesystem as the store
    pub fn temp_path(&self, prefix: &str) -> HermitResult<PathBuf> {
        let dir = self.tmp_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| HermitError::io(format!("creating {}", dir.display()), e))?;
        Ok(dir.join(format!("{}-{}", prefix, Uuid::new_v4())))
    }

    /// Remove a temporary file or directory, ignoring absence
    pub fn discard(&self, tmp: &Path) {
        let result = if tmp.is_dir() {
            fs::remove_dir_all(tmp)
        } else {
            fs::remove_file(tmp)
        };
        if let Err(e) = result {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("Failed to discard {}: {}", tmp.display(), e);
            }
        }
    }

    /// Verify a temporary file and commit it. The temporary file is gone afterwards
    /// whatever the outcome.
    pub fn ingest(
        &self,
        tmp: &Path,
        declared: &[ChecksumInfo],
        mode: Mode,
        subject: &str,
    ) -> HermitResult<(Verification, PathBuf)> {
        let verification = match checksum::verify_file(tmp, declared, mode, subject) {
            Ok(v) => v,
            Err(e) => {
                self.discard(tmp);
                return Err(e);
            }
        };
        let blob = self.commit(tmp, &verification.sha256)?;
        Ok((verification, blob))
    }

    /// Move verified content from `tmp` to its content-addressed name.
    ///
    /// The blob is published with a single hard link, so it is either absent or
    /// complete. An existing blob is kept and `tmp` is dropped.
    pub fn commit(&self, tmp: &Path, sha256: &str) -> HermitResult<PathBuf> {
        if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            self.discard(tmp);
            return Err(HermitError::Internal(format!(
                "refusing to store blob under malformed digest '{}'",
                sha256
            )));
        }

        let blobs = self.blobs_dir();
        fs::create_dir_all(&blobs)
            .map_err(|e| HermitError::io(format!("creating {}", blobs.display()), e))?;
        let target = self.blob_path(sha256);

        make_read_only(tmp)?;
        match fs::hard_link(tmp, &target) {
            Ok(()) => debug!("Stored blob {}", sha256),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Blob {} already stored", sha256);
            }
            Err(e) => {
                debug!("Hard link into store failed ({}), renaming instead", e);
                if !target.exists() {
                    fs::rename(tmp, &target).map_err(|e| {
                        HermitError::io(format!("storing blob {}", target.display()), e)
                    })?;
                    return Ok(target);
                }
            }
        }

        self.discard(tmp);
        Ok(target)
    }
}

fn make_read_only(path: &Path) -> HermitResult<()> {
    let mut permissions = fs::metadata(path)
        .map_err(|e| HermitError::io(format!("reading metadata of {}", path.display()), e))?
        .permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
        .map_err(|e| HermitError::io(format!("protecting {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Algorithm;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn write_tmp(store: &ContentStore, content: &[u8]) -> PathBuf {
        let tmp = store.temp_path("test").unwrap();
        fs::write(&tmp, content).unwrap();
        tmp
    }

    #[test]
    fn ingest_commits_verified_content() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let tmp = write_tmp(&store, b"hello");
        let declared = vec![ChecksumInfo::new(Algorithm::Sha256, HELLO_SHA256).unwrap()];

        let (verification, blob) = store.ingest(&tmp, &declared, Mode::Strict, "hello").unwrap();

        assert_eq!(verification.sha256, HELLO_SHA256);
        assert_eq!(blob, temp.path().join("deps/.store/sha256").join(HELLO_SHA256));
        assert_eq!(fs::read(&blob).unwrap(), b"hello");
        assert!(!tmp.exists());
    }

    #[test]
    fn mismatch_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let tmp = write_tmp(&store, b"tampered");
        let declared = vec![ChecksumInfo::new(Algorithm::Sha256, HELLO_SHA256).unwrap()];

        let err = store
            .ingest(&tmp, &declared, Mode::Permissive, "hello")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChecksumVerificationFailed);
        assert!(!tmp.exists());
        assert!(!store.contains(HELLO_SHA256));
        let committed = fs::read_dir(store.blobs_dir()).map(|d| d.count()).unwrap_or(0);
        assert_eq!(committed, 0);
    }

    #[test]
    fn same_digest_is_stored_once() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());

        let first = store.commit(&write_tmp(&store, b"hello"), HELLO_SHA256).unwrap();
        let second = store.commit(&write_tmp(&store, b"hello"), HELLO_SHA256).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read_dir(store.blobs_dir()).unwrap().count(), 1);
        assert_eq!(fs::read_dir(store.tmp_dir()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_writers_converge() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ContentStore::new(temp.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let tmp = write_tmp(&store, b"hello");
                    store.ingest(&tmp, &[], Mode::Permissive, "hello").unwrap().1
                })
            })
            .collect();

        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.iter().all(|p| p == &paths[0]));
        assert_eq!(fs::read_dir(store.blobs_dir()).unwrap().count(), 1);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"hello");
    }

    #[test]
    fn malformed_digest_is_refused() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let tmp = write_tmp(&store, b"hello");
        assert!(store.commit(&tmp, "../../escape").is_err());
        assert!(!tmp.exists());
    }
}
