//! Paths that are guaranteed to stay inside a root directory

use crate::error::{HermitError, HermitResult};
use std::path::{Component, Path, PathBuf};

/// An absolute path paired with the root it must not escape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootedPath {
    root: PathBuf,
    subpath: PathBuf,
}

impl RootedPath {
    /// Create a rooted path at the root itself
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            subpath: PathBuf::new(),
        }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root
    pub fn subpath(&self) -> &Path {
        &self.subpath
    }

    /// Full path
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.subpath)
    }

    /// Join a relative path, refusing any result outside the root.
    ///
    /// `..` components are resolved lexically. Existing symlinks along the way
    /// are resolved and must also point inside the root.
    pub fn join_within_root(&self, path: impl AsRef<Path>) -> HermitResult<RootedPath> {
        let path = path.as_ref();
        let outside = || HermitError::PathOutsideRoot {
            root: self.root.clone(),
            path: self.root.join(&self.subpath).join(path),
        };

        let mut subpath = self.subpath.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => subpath.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !subpath.pop() {
                        return Err(outside());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(outside()),
            }
        }

        let joined = RootedPath {
            root: self.root.clone(),
            subpath,
        };
        joined.check_symlinks().map_err(|_| outside())?;
        Ok(joined)
    }

    fn check_symlinks(&self) -> Result<(), ()> {
        let Ok(root) = self.root.canonicalize() else {
            return Ok(());
        };

        // Canonicalize the longest existing prefix.
        let mut existing = self.path();
        while !existing.exists() {
            if !existing.pop() {
                return Ok(());
            }
        }
        match existing.canonicalize() {
            Ok(real) if real.starts_with(&root) => Ok(()),
            Ok(_) => Err(()),
            Err(_) => Ok(()),
        }
    }
}
