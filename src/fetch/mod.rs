//! Fetching: downloads, git checkouts, artifact verification and the
//! orchestrator that runs drivers over a request list.

pub mod artifact;
pub mod download;
pub mod orchestrator;
pub mod scm;

pub use artifact::{
    Artifact, ArtifactFetcher, ArtifactSource, ArtifactState, FetchObserver, FetchedArtifact,
    NoProgress, RejectReason,
};
pub use download::{Downloader, HttpDownloader};
pub use orchestrator::{FetchOptions, FetchOrchestrator, FetchReport};
pub use scm::GitClient;

use std::sync::{Arc, Mutex};
use tracing::warn;

/// Warnings collected during a run, in the order they were recorded
#[derive(Debug, Clone, Default)]
pub struct WarningLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl WarningLog {
    /// Log and keep a warning
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message);
    }

    /// Copy of every warning recorded so far
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory downloader for tests

    use super::Downloader;
    use crate::error::{HermitError, HermitResult};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct StaticDownloader {
        responses: HashMap<String, Vec<u8>>,
        failures: Mutex<HashMap<String, usize>>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticDownloader {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `body` at `url`
        pub fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.responses.insert(url.to_string(), body.to_vec());
            self
        }

        /// Fail the first `times` requests to `url` with a retryable error
        pub fn failing_first(self, url: &str, times: usize) -> Self {
            self.failures
                .lock()
                .unwrap()
                .insert(url.to_string(), times);
            self
        }

        /// Counter of download attempts
        pub fn calls(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl Downloader for StaticDownloader {
        async fn download(&self, url: &str, dest: &Path) -> HermitResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(url) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(HermitError::fetch(url, "connection reset"));
                    }
                }
            }
            match self.responses.get(url) {
                Some(body) => {
                    tokio::fs::write(dest, body)
                        .await
                        .map_err(|e| HermitError::io("writing test download", e))?;
                    Ok(body.len() as u64)
                }
                None => Err(HermitError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP status 404".to_string(),
                    retryable: false,
                }),
            }
        }
    }
}
