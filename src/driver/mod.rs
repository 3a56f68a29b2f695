//! Ecosystem drivers
//!
//! A driver turns one package request into fetched artifacts plus the
//! components, environment variables and project file edits describing them.
//! Drivers never see each other's state; the shared content store is the only
//! place where their work meets.

pub mod generic;
pub mod huggingface;
pub mod npm;
pub mod registry;

pub use registry::DriverRegistry;

use crate::config::Config;
use crate::error::{HermitError, HermitResult};
use crate::fetch::{ArtifactFetcher, FetchedArtifact, WarningLog};
use crate::output::RequestOutput;
use crate::request::{Flag, Mode, PackageRequest, EXPERIMENTAL_PREFIX};
use crate::rooted_path::RootedPath;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fetch behavior for one ecosystem
#[async_trait]
pub trait Driver: Send + Sync {
    /// Ecosystem identifier used in requests
    fn ecosystem(&self) -> &'static str;

    /// Experimental drivers need the `dev-package-managers` flag
    fn is_experimental(&self) -> bool {
        self.ecosystem().starts_with(EXPERIMENTAL_PREFIX)
    }

    /// Fetch everything `request` needs
    async fn fetch(&self, request: &PackageRequest, ctx: &DriverContext)
        -> HermitResult<RequestOutput>;
}

/// Everything a driver may use during one run
#[derive(Clone)]
pub struct DriverContext {
    pub source_root: RootedPath,
    pub output_root: PathBuf,
    pub mode: Mode,
    pub flags: BTreeSet<Flag>,
    pub fetcher: Arc<ArtifactFetcher>,
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
    pub warnings: WarningLog,
}

/// Lockfile format version understood by the YAML-based drivers
pub(crate) const LOCKFILE_VERSION: &str = "1.0";

/// Locate a driver's lockfile: the `lockfile` option when given, else
/// `default_name` in the package directory.
pub(crate) fn lockfile_path(request: &PackageRequest, default_name: &str) -> HermitResult<PathBuf> {
    match request.option_str("lockfile") {
        Some(path) if Path::new(path).is_absolute() => Ok(PathBuf::from(path)),
        Some(path) => Ok(request.root_path.join_within_root(path)?.path()),
        None => Ok(request.root_path.join_within_root(default_name)?.path()),
    }
}

/// Path of `path` relative to the source root, for messages and SBOM properties
pub(crate) fn display_path(ctx: &DriverContext, path: &Path) -> String {
    path.strip_prefix(ctx.source_root.root())
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Read a YAML lockfile whose `metadata.version` must be [`LOCKFILE_VERSION`]
pub(crate) async fn load_yaml_lockfile<T: DeserializeOwned>(path: &Path) -> HermitResult<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(HermitError::LockfileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(HermitError::io(format!("reading {}", path.display()), e)),
    };

    let invalid = |reason: String| HermitError::InvalidLockfileFormat {
        path: path.to_path_buf(),
        reason,
    };
    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let version = value
        .get("metadata")
        .and_then(|m| m.get("version"))
        .ok_or_else(|| invalid("missing metadata.version".to_string()))?;
    let version = match version {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => return Err(invalid(format!("metadata.version must be a string, got {:?}", other))),
    };
    if version != LOCKFILE_VERSION {
        return Err(HermitError::UnsupportedLockfileVersion {
            path: path.to_path_buf(),
            version,
        });
    }

    serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))
}

/// Index fetched artifacts by their source so drivers can find what survived
pub(crate) fn index_fetched(fetched: Vec<FetchedArtifact>) -> HashMap<String, FetchedArtifact> {
    fetched
        .into_iter()
        .map(|f| (f.artifact.source.to_string(), f))
        .collect()
}
