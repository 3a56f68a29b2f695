//! Logical placement of stored blobs

use super::DEPS_DIR;
use crate::checksum;
use crate::error::{HermitError, HermitResult};
use crate::rooted_path::RootedPath;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where an artifact appears under `deps/<ecosystem>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `deps/<ecosystem>/<file_name>`
    FlatName { ecosystem: String, file_name: String },
    /// `deps/<ecosystem>/external-<bucket>/<file_name>`
    ExternalBucket {
        ecosystem: String,
        bucket: String,
        file_name: String,
    },
    /// `deps/<ecosystem>/<host>/<namespace>/<repo>/<file_name>`
    Vcs {
        ecosystem: String,
        host: String,
        namespace: String,
        repo: String,
        file_name: String,
    },
}

impl Layout {
    /// Path relative to the output root
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(DEPS_DIR);
        match self {
            Layout::FlatName {
                ecosystem,
                file_name,
            } => {
                path.push(ecosystem);
                path.push(file_name);
            }
            Layout::ExternalBucket {
                ecosystem,
                bucket,
                file_name,
            } => {
                path.push(ecosystem);
                path.push(format!("external-{}", bucket));
                path.push(file_name);
            }
            Layout::Vcs {
                ecosystem,
                host,
                namespace,
                repo,
                file_name,
            } => {
                path.push(ecosystem);
                path.push(host);
                if !namespace.is_empty() {
                    path.push(namespace);
                }
                path.push(repo);
                path.push(file_name);
            }
        }
        path
    }

    fn file_name(&self) -> &str {
        match self {
            Layout::FlatName { file_name, .. }
            | Layout::ExternalBucket { file_name, .. }
            | Layout::Vcs { file_name, .. } => file_name,
        }
    }
}

/// Place a stored blob according to `layout` and return its path.
///
/// Placing the same content twice is a no-op. Placing different content
/// under an existing name fails.
pub fn place(output_root: &Path, blob: &Path, sha256: &str, layout: &Layout) -> HermitResult<PathBuf> {
    let name = layout.file_name();
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(HermitError::InvalidInput(format!(
            "Invalid artifact file name: {:?}",
            name
        )));
    }

    let dest = RootedPath::new(output_root)
        .join_within_root(layout.relative_path())?
        .path();
    link_blob(blob, &dest, sha256)?;
    Ok(dest)
}

/// Link `blob` at `dest`, creating parent directories.
pub(crate) fn link_blob(blob: &Path, dest: &Path, sha256: &str) -> HermitResult<()> {
    if fs::symlink_metadata(dest).is_ok() {
        return ensure_same_content(blob, dest, sha256);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| HermitError::io(format!("creating {}", parent.display()), e))?;
    }

    match fs::hard_link(blob, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            ensure_same_content(blob, dest, sha256)
        }
        Err(e) => {
            debug!(
                "Hard link {} failed ({}), falling back to a symlink",
                dest.display(),
                e
            );
            link_fallback(blob, dest)
        }
    }
}

#[cfg(unix)]
fn link_fallback(blob: &Path, dest: &Path) -> HermitResult<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    std::os::unix::fs::symlink(super::relative_path(parent, blob), dest)
        .map_err(|e| HermitError::io(format!("linking {}", dest.display()), e))
}

#[cfg(not(unix))]
fn link_fallback(blob: &Path, dest: &Path) -> HermitResult<()> {
    fs::copy(blob, dest)
        .map(|_| ())
        .map_err(|e| HermitError::io(format!("copying {}", dest.display()), e))
}

fn ensure_same_content(blob: &Path, dest: &Path, sha256: &str) -> HermitResult<()> {
    if same_file(blob, dest) || checksum::sha256_file(dest)? == sha256 {
        debug!("{} already in place", dest.display());
        return Ok(());
    }
    Err(HermitError::PackageRejected {
        reason: format!(
            "{} already exists with different content than {}",
            dest.display(),
            sha256
        ),
        solution: "Two requested artifacts map to the same file name. \
                   Rename one of them in its lockfile or use a clean output directory."
            .to_string(),
    })
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_a: &Path, _b: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentStore;
    use crate::error::ErrorKind;
    use crate::request::Mode;
    use tempfile::TempDir;

    fn stored(store: &ContentStore, content: &[u8]) -> (PathBuf, String) {
        let tmp = store.temp_path("test").unwrap();
        fs::write(&tmp, content).unwrap();
        let (verification, blob) = store.ingest(&tmp, &[], Mode::Permissive, "test").unwrap();
        (blob, verification.sha256)
    }

    fn flat(name: &str) -> Layout {
        Layout::FlatName {
            ecosystem: "generic".to_string(),
            file_name: name.to_string(),
        }
    }

    #[test]
    fn layout_paths() {
        assert_eq!(flat("a.tgz").relative_path(), PathBuf::from("deps/generic/a.tgz"));
        let bucket = Layout::ExternalBucket {
            ecosystem: "npm".to_string(),
            bucket: "left-pad".to_string(),
            file_name: "left-pad-external-sha512-abc.tgz".to_string(),
        };
        assert_eq!(
            bucket.relative_path(),
            PathBuf::from("deps/npm/external-left-pad/left-pad-external-sha512-abc.tgz")
        );
        let vcs = Layout::Vcs {
            ecosystem: "npm".to_string(),
            host: "github.com".to_string(),
            namespace: "org".to_string(),
            repo: "lib".to_string(),
            file_name: "lib-external-gitcommit-abc.tgz".to_string(),
        };
        assert_eq!(
            vcs.relative_path(),
            PathBuf::from("deps/npm/github.com/org/lib/lib-external-gitcommit-abc.tgz")
        );
    }

    #[test]
    fn identical_content_shares_one_blob() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let (blob_a, sha_a) = stored(&store, b"same bytes");
        let (blob_b, sha_b) = stored(&store, b"same bytes");

        let a = place(temp.path(), &blob_a, &sha_a, &flat("a.bin")).unwrap();
        let b = place(temp.path(), &blob_b, &sha_b, &flat("b.bin")).unwrap();

        assert_eq!(blob_a, blob_b);
        assert!(same_file(&a, &b));
        assert_eq!(fs::read_dir(store.blobs_dir()).unwrap().count(), 1);
    }

    #[test]
    fn placing_twice_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let (blob, sha) = stored(&store, b"content");

        let first = place(temp.path(), &blob, &sha, &flat("x.bin")).unwrap();
        let second = place(temp.path(), &blob, &sha, &flat("x.bin")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_content_under_same_name_fails() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let (blob_a, sha_a) = stored(&store, b"one");
        let (blob_b, sha_b) = stored(&store, b"two");

        place(temp.path(), &blob_a, &sha_a, &flat("x.bin")).unwrap();
        let err = place(temp.path(), &blob_b, &sha_b, &flat("x.bin")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PackageRejected);
    }

    #[test]
    fn escaping_names_are_rejected() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(temp.path());
        let (blob, sha) = stored(&store, b"content");

        assert!(place(temp.path(), &blob, &sha, &flat("../../evil")).is_err());
        let vcs = Layout::Vcs {
            ecosystem: "npm".to_string(),
            host: "..".to_string(),
            namespace: "..".to_string(),
            repo: "..".to_string(),
            file_name: "x.tgz".to_string(),
        };
        assert_eq!(
            place(temp.path(), &blob, &sha, &vcs).unwrap_err().kind(),
            ErrorKind::PathOutsideRoot
        );
    }
}
