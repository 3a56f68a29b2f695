//! Model hub cache layout
//!
//! Mirrors the on-disk format hub clients read offline:
//!
//! ```text
//! hub/models--<ns>--<name>/
//!     blobs/<sha256>                       content, hard-linked from the store
//!     snapshots/<revision>/<path>          relative symlink to ../../blobs/<sha256>
//!     refs/<ref>                           file containing <revision>
//! ```
//!
//! A snapshot directory is assembled next to its final location and renamed
//! into place, so readers see either the complete set of links or none.
//! Placements are serialized within the process so that two requests adding
//! files to one revision both land.

use super::layout::link_blob;
use super::{relative_path, DEPS_DIR};
use crate::error::{HermitError, HermitResult};
use crate::rooted_path::RootedPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

/// Held while a snapshot is read, rebuilt and swapped
static SNAPSHOT_PLACEMENT: Mutex<()> = Mutex::new(());

/// Hub cache directory relative to the output root
pub const HUB_DIR: &str = "huggingface/hub";

/// Kind of hub repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    #[default]
    Model,
    Dataset,
}

impl RepoKind {
    fn dir_prefix(self) -> &'static str {
        match self {
            RepoKind::Model => "models",
            RepoKind::Dataset => "datasets",
        }
    }
}

/// A hub repository identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRepo {
    pub kind: RepoKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl HubRepo {
    /// Parse `name` or `namespace/name`
    pub fn parse(kind: RepoKind, repository: &str) -> HermitResult<Self> {
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        let (namespace, name) = match repository.split_once('/') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, repository),
        };
        if !valid(name) || namespace.is_some_and(|ns| !valid(ns)) {
            return Err(HermitError::InvalidInput(format!(
                "Invalid hub repository name: {:?}",
                repository
            )));
        }
        Ok(Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Repository id as written in lockfiles
    pub fn repository(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    /// Directory name inside the hub cache
    pub fn dir_name(&self) -> String {
        let mut dir = self.kind.dir_prefix().to_string();
        if let Some(ns) = &self.namespace {
            dir.push_str("--");
            dir.push_str(ns);
        }
        dir.push_str("--");
        dir.push_str(&self.name);
        dir
    }
}

/// A file of a snapshot, already committed to the content store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubFile {
    pub path: String,
    pub sha256: String,
    pub blob: PathBuf,
}

/// The hub cache under `<output>/deps/huggingface/hub`
#[derive(Debug, Clone)]
pub struct HubCache {
    root: PathBuf,
}

impl HubCache {
    pub fn new(output_root: &Path) -> Self {
        Self {
            root: output_root.join(DEPS_DIR).join(HUB_DIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Place `files` as the snapshot `revision` of `repo` and point `ref_name` at it.
    ///
    /// Files already present in an existing snapshot of the same revision are
    /// kept; a path that would change its content is a conflict.
    pub fn place_snapshot(
        &self,
        repo: &HubRepo,
        revision: &str,
        ref_name: &str,
        files: &[HubFile],
    ) -> HermitResult<PathBuf> {
        let repo_dir = self.root.join(repo.dir_name());
        let blobs_dir = repo_dir.join("blobs");
        for file in files {
            link_blob(&file.blob, &blobs_dir.join(&file.sha256), &file.sha256)?;
        }

        let mut parts = Path::new(revision).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            return Err(HermitError::InvalidInput(format!(
                "Invalid revision: {:?}",
                revision
            )));
        }

        // Links point into blobs/, so containment is checked against the repo dir
        let snapshot =
            RootedPath::new(&repo_dir).join_within_root(Path::new("snapshots").join(revision))?;
        let final_dir = snapshot.path();
        let mut placements = Vec::with_capacity(files.len());
        for file in files {
            let link = snapshot.join_within_root(&file.path)?.path();
            let Some(key) = link
                .strip_prefix(&final_dir)
                .ok()
                .filter(|key| !key.as_os_str().is_empty())
                .map(Path::to_path_buf)
            else {
                return Err(HermitError::PathOutsideRoot {
                    root: final_dir,
                    path: link,
                });
            };
            let link_dir = link.parent().unwrap_or(final_dir.as_path());
            let target = relative_path(link_dir, &blobs_dir.join(&file.sha256));
            placements.push((key, target, file));
        }

        {
            let _placing = SNAPSHOT_PLACEMENT
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let existing = read_links(&final_dir)?;
            let mut desired = existing.clone();
            for (key, target, file) in placements {
                if existing.get(&key).is_some_and(|current| current != &target) {
                    return Err(HermitError::PackageRejected {
                        reason: format!(
                            "{} at revision {} of {} already points to different content",
                            file.path,
                            revision,
                            repo.repository()
                        ),
                        solution: "The same revision cannot have two different contents. \
                                   Check the checksums in the lockfile."
                            .to_string(),
                    });
                }
                desired.insert(key, target);
            }

            if final_dir.exists() && desired == existing {
                debug!("Snapshot {} of {} already complete", revision, repo.repository());
            } else {
                self.publish_snapshot(&final_dir, &desired)?;
            }
        }

        self.write_ref(&repo_dir, ref_name, revision)?;
        Ok(final_dir)
    }

    fn publish_snapshot(
        &self,
        final_dir: &Path,
        links: &BTreeMap<PathBuf, PathBuf>,
    ) -> HermitResult<()> {
        let parent = final_dir.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .map_err(|e| HermitError::io(format!("creating {}", parent.display()), e))?;

        let staging = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = build_links(&staging, links).and_then(|()| swap_into_place(&staging, final_dir));
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        result
    }

    fn write_ref(&self, repo_dir: &Path, ref_name: &str, revision: &str) -> HermitResult<()> {
        let refs = RootedPath::new(repo_dir.join("refs"));
        let ref_path = refs.join_within_root(ref_name)?.path();
        if ref_path == refs.path() {
            return Err(HermitError::InvalidInput(format!(
                "Invalid ref: {:?}",
                ref_name
            )));
        }
        let dir = ref_path.parent().unwrap_or(refs.root());
        fs::create_dir_all(dir)
            .map_err(|e| HermitError::io(format!("creating {}", dir.display()), e))?;

        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, revision)
            .map_err(|e| HermitError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &ref_path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            HermitError::io(format!("writing {}", ref_path.display()), e)
        })
    }
}

fn read_links(dir: &Path) -> HermitResult<BTreeMap<PathBuf, PathBuf>> {
    let mut links = BTreeMap::new();
    if !dir.exists() {
        return Ok(links);
    }
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            HermitError::io(
                format!("reading snapshot {}", dir.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            )
        })?;
        if !entry.path_is_symlink() {
            continue;
        }
        let target = fs::read_link(entry.path())
            .map_err(|e| HermitError::io(format!("reading {}", entry.path().display()), e))?;
        let key = entry
            .path()
            .strip_prefix(dir)
            .map(Path::to_path_buf)
            .map_err(|e| HermitError::Internal(e.to_string()))?;
        links.insert(key, target);
    }
    Ok(links)
}

fn build_links(staging: &Path, links: &BTreeMap<PathBuf, PathBuf>) -> HermitResult<()> {
    fs::create_dir_all(staging)
        .map_err(|e| HermitError::io(format!("creating {}", staging.display()), e))?;
    for (path, target) in links {
        let link = staging.join(path);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| HermitError::io(format!("creating {}", parent.display()), e))?;
        }
        symlink_file(target, &link)?;
    }
    Ok(())
}

/// Replace `final_dir` with `staging`. Callers hold [`SNAPSHOT_PLACEMENT`].
fn swap_into_place(staging: &Path, final_dir: &Path) -> HermitResult<()> {
    if !final_dir.exists() {
        return fs::rename(staging, final_dir)
            .map_err(|e| HermitError::io(format!("publishing {}", final_dir.display()), e));
    }

    let parent = final_dir.parent().unwrap_or(Path::new("."));
    let retired = parent.join(format!(".old-{}", Uuid::new_v4()));
    fs::rename(final_dir, &retired)
        .map_err(|e| HermitError::io(format!("retiring {}", final_dir.display()), e))?;
    fs::rename(staging, final_dir)
        .map_err(|e| HermitError::io(format!("publishing {}", final_dir.display()), e))?;
    let _ = fs::remove_dir_all(&retired);
    Ok(())
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> HermitResult<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| HermitError::io(format!("linking {}", link.display()), e))
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> HermitResult<()> {
    std::os::windows::fs::symlink_file(target, link)
        .map_err(|e| HermitError::io(format!("linking {}", link.display()), e))
}
