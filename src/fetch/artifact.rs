//! Artifact fetching
//!
//! Every artifact goes through the same states:
//!
//! | From | To | When |
//! |------|----|------|
//! | Declared | Fetching | a download slot is free and the run is not cancelled |
//! | Fetching | Verified | every declared digest matched (or none declared, permissive) |
//! | Verified | Cached | the blob is committed to the content store |
//! | Declared, Fetching | Rejected | any failure; terminal |

use super::download::Downloader;
use super::scm::GitClient;
use super::WarningLog;
use crate::cache::ContentStore;
use crate::checksum::{self, Algorithm, ChecksumInfo, Verification};
use crate::config::schema::FetchConfig;
use crate::error::{ErrorKind, HermitError, HermitResult};
use crate::request::Mode;
use futures_util::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where an artifact comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A package registry coordinate with its resolved tarball URL
    Registry {
        name: String,
        version: String,
        url: String,
    },
    /// A plain URL
    Url(String),
    /// A pinned commit of a git repository
    Git { url: String, revision: String },
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactSource::Registry { name, version, .. } => write!(f, "{}@{}", name, version),
            ArtifactSource::Url(url) => f.write_str(url),
            ArtifactSource::Git { url, revision } => write!(f, "{}#{}", url, revision),
        }
    }
}

/// An artifact a driver wants fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub source: ArtifactSource,
    pub checksums: Vec<ChecksumInfo>,
}

impl Artifact {
    pub fn new(source: ArtifactSource, checksums: Vec<ChecksumInfo>) -> Self {
        Self { source, checksums }
    }

    fn declared_sha256(&self) -> Option<&str> {
        self.checksums
            .iter()
            .find(|c| c.algorithm == Algorithm::Sha256)
            .map(|c| c.hex_digest.as_str())
    }
}

/// A verified artifact committed to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub artifact: Artifact,
    pub sha256: String,
    pub blob: PathBuf,
    /// Accepted without any declared checksum
    pub unverified: bool,
}

/// Why an artifact was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ChecksumMismatch,
    MissingChecksumStrict,
    FetchError,
    UnsupportedFormat,
}

impl RejectReason {
    fn from_error(err: &HermitError) -> Self {
        match err.kind() {
            ErrorKind::ChecksumVerificationFailed => RejectReason::ChecksumMismatch,
            ErrorKind::MissingChecksum => RejectReason::MissingChecksumStrict,
            ErrorKind::UnexpectedFormat | ErrorKind::UnsupportedFeature => {
                RejectReason::UnsupportedFormat
            }
            _ => RejectReason::FetchError,
        }
    }
}

/// Lifecycle of one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Declared,
    Fetching,
    Verified,
    Cached,
    Rejected(RejectReason),
}

impl ArtifactState {
    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn transition(self, next: ArtifactState) -> HermitResult<ArtifactState> {
        use ArtifactState::*;
        match (self, next) {
            (Declared, Fetching)
            | (Fetching, Verified)
            | (Verified, Cached)
            | (Declared, Rejected(_))
            | (Fetching, Rejected(_)) => Ok(next),
            (from, to) => Err(HermitError::Internal(format!(
                "invalid artifact transition {:?} -> {:?}",
                from, to
            ))),
        }
    }
}

/// Receives progress notifications
pub trait FetchObserver: Send + Sync {
    /// `count` more artifacts were scheduled
    fn queued(&self, count: u64);
    /// One artifact finished, successfully or not
    fn finished(&self, label: &str);
}

/// Observer that ignores everything
pub struct NoProgress;

impl FetchObserver for NoProgress {
    fn queued(&self, _count: u64) {}
    fn finished(&self, _label: &str) {}
}

/// Downloads, verifies and stores artifacts
pub struct ArtifactFetcher {
    downloader: Arc<dyn Downloader>,
    git: GitClient,
    store: ContentStore,
    mode: Mode,
    max_tries: u32,
    backoff: Duration,
    concurrency: usize,
    warnings: WarningLog,
    observer: Arc<dyn FetchObserver>,
}

impl ArtifactFetcher {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        store: ContentStore,
        mode: Mode,
        config: &FetchConfig,
        warnings: WarningLog,
    ) -> Self {
        Self {
            downloader,
            git: GitClient::new().with_fetch_config(config),
            store,
            mode,
            max_tries: config.download_max_tries.max(1),
            backoff: config.retry_backoff(),
            concurrency: config.concurrency_limit.max(1),
            warnings,
            observer: Arc::new(NoProgress),
        }
    }

    /// Report progress to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use a specific git client
    pub fn with_git(mut self, git: GitClient) -> Self {
        self.git = git;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Fetch every artifact with bounded concurrency.
    ///
    /// The first fatal failure cancels `cancel`, so artifacts that have not
    /// started yet are skipped while in-flight ones drain. In permissive mode a
    /// final fetch error is recorded as a warning and the artifact is left out
    /// of the result.
    pub async fn fetch_all(
        &self,
        artifacts: Vec<Artifact>,
        cancel: &CancellationToken,
    ) -> HermitResult<Vec<FetchedArtifact>> {
        self.observer.queued(artifacts.len() as u64);

        let mut results: Vec<(usize, HermitResult<FetchedArtifact>)> =
            stream::iter(artifacts.into_iter().enumerate())
                .map(|(index, artifact)| async move {
                    let result = self.fetch_one(artifact, cancel).await;
                    if let Err(ref e) = result {
                        if self.is_fatal(e) {
                            cancel.cancel();
                        }
                    }
                    (index, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut fetched = Vec::with_capacity(results.len());
        let mut first_error: Option<HermitError> = None;
        for (_, result) in results {
            match result {
                Ok(artifact) => fetched.push(artifact),
                Err(e) if !self.is_fatal(&e) => {
                    self.warnings
                        .record(format!("{}; the artifact was left out", e));
                }
                Err(e) => {
                    let replace = match &first_error {
                        None => true,
                        Some(HermitError::Cancelled) => !matches!(e, HermitError::Cancelled),
                        Some(_) => false,
                    };
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(fetched),
        }
    }

    fn is_fatal(&self, err: &HermitError) -> bool {
        !(self.mode == Mode::Permissive && err.kind() == ErrorKind::FetchError)
    }

    /// Fetch a single artifact
    pub async fn fetch_one(
        &self,
        artifact: Artifact,
        cancel: &CancellationToken,
    ) -> HermitResult<FetchedArtifact> {
        let label = artifact.source.to_string();
        let state = ArtifactState::Declared;
        if cancel.is_cancelled() {
            state.transition(ArtifactState::Rejected(RejectReason::FetchError))?;
            return Err(HermitError::Cancelled);
        }

        let result = self.fetch_and_store(&artifact, state, cancel).await;
        self.observer.finished(&label);

        match result {
            Ok((verification, blob)) => {
                if verification.unverified {
                    self.warnings.record(format!(
                        "Missing checksum for {}, the artifact was accepted unverified",
                        label
                    ));
                }
                Ok(FetchedArtifact {
                    artifact,
                    sha256: verification.sha256,
                    blob,
                    unverified: verification.unverified,
                })
            }
            Err(e) => {
                if !matches!(e, HermitError::Cancelled) {
                    self.mode.error_or_warn(&format!("Rejected {}: {}", label, e));
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        artifact: &Artifact,
        state: ArtifactState,
        cancel: &CancellationToken,
    ) -> HermitResult<(Verification, PathBuf)> {
        let label = artifact.source.to_string();
        let state = state.transition(ArtifactState::Fetching)?;
        let outcome = self.acquire(artifact, &label, cancel).await;
        let state = match &outcome {
            Ok(_) => state
                .transition(ArtifactState::Verified)?
                .transition(ArtifactState::Cached)?,
            Err(e) => state.transition(ArtifactState::Rejected(RejectReason::from_error(e)))?,
        };
        debug!("{} is {:?}", label, state);
        outcome
    }

    /// Download or reuse the artifact and store it under its digest
    async fn acquire(
        &self,
        artifact: &Artifact,
        label: &str,
        cancel: &CancellationToken,
    ) -> HermitResult<(Verification, PathBuf)> {
        match &artifact.source {
            ArtifactSource::Registry { url, .. } | ArtifactSource::Url(url) => {
                if artifact.checksums.is_empty() && self.mode == Mode::Strict {
                    return Err(HermitError::MissingChecksum {
                        subject: label.to_string(),
                    });
                }
                if let Some(hit) = self.cached_blob(artifact, label).await? {
                    return Ok(hit);
                }
                let tmp = self.store.temp_path("download")?;
                self.download_with_retries(url, &tmp, cancel).await?;
                self.ingest(tmp, &artifact.checksums, self.mode, label).await
            }
            ArtifactSource::Git { url, revision } => {
                let tmp = self.store.temp_path("git")?;
                let work = self.store.temp_path("git-work")?;
                if let Err(e) = self.git.archive_revision(url, revision, &tmp, &work).await {
                    self.store.discard(&tmp);
                    return Err(e);
                }
                // The pinned commit id is the integrity check for VCS sources.
                let (verification, blob) = self
                    .ingest(tmp, &artifact.checksums, Mode::Permissive, label)
                    .await?;
                Ok((
                    Verification {
                        unverified: false,
                        ..verification
                    },
                    blob,
                ))
            }
        }
    }

    /// Verify `tmp` and commit it to the store off the async runtime
    async fn ingest(
        &self,
        tmp: PathBuf,
        declared: &[ChecksumInfo],
        mode: Mode,
        subject: &str,
    ) -> HermitResult<(Verification, PathBuf)> {
        let store = self.store.clone();
        let declared = declared.to_vec();
        let subject = subject.to_string();
        let (verification, blob) = tokio::task::spawn_blocking(move || {
            store.ingest(&tmp, &declared, mode, &subject)
        })
        .await
        .map_err(|e| HermitError::Internal(format!("verification task failed: {}", e)))??;
        debug!("Stored {}", blob.display());
        Ok((verification, blob))
    }

    /// Reuse a blob from a previous run when the declared SHA-256 is already stored
    async fn cached_blob(
        &self,
        artifact: &Artifact,
        label: &str,
    ) -> HermitResult<Option<(Verification, PathBuf)>> {
        let Some(sha256) = artifact.declared_sha256() else {
            return Ok(None);
        };
        if !self.store.contains(sha256) {
            return Ok(None);
        }
        let blob = self.store.blob_path(sha256);
        let verification = self
            .verify(&blob, &artifact.checksums, self.mode, label)
            .await?;
        debug!("Reusing stored blob for {}", label);
        Ok(Some((verification, blob)))
    }

    async fn download_with_retries(
        &self,
        url: &str,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> HermitResult<()> {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                self.store.discard(tmp);
                return Err(HermitError::Cancelled);
            }
            match self.downloader.download(url, tmp).await {
                Ok(bytes) => {
                    debug!("Fetched {} ({} bytes)", url, bytes);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_tries => {
                    warn!(
                        "Attempt {}/{} to fetch {} failed: {}",
                        attempt, self.max_tries, url, e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.store.discard(tmp);
                    return Err(e);
                }
            }
        }
    }

    async fn verify(
        &self,
        path: &Path,
        declared: &[ChecksumInfo],
        mode: Mode,
        subject: &str,
    ) -> HermitResult<Verification> {
        let path = path.to_path_buf();
        let declared = declared.to_vec();
        let subject = subject.to_string();
        tokio::task::spawn_blocking(move || {
            checksum::verify_file(&path, &declared, mode, &subject)
        })
        .await
        .map_err(|e| HermitError::Internal(format!("verification task failed: {}", e)))?
    }
}
