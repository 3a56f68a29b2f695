//! HTTP downloads
//!
//! The [`Downloader`] trait lets tests substitute canned responses for the
//! network. Retries are the caller's concern; an implementation makes one
//! attempt and reports whether a failure is worth retrying.

use crate::error::{HermitError, HermitResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Fetches a URL into a local file
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`, replacing it. Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> HermitResult<u64>;
}

/// Downloader backed by a shared `ureq` agent
#[derive(Clone)]
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    /// Create a downloader whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> HermitResult<u64> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let dest: PathBuf = dest.to_path_buf();

        tokio::task::spawn_blocking(move || download_blocking(&agent, &url, &dest))
            .await
            .map_err(|e| HermitError::Internal(format!("download task failed: {}", e)))?
    }
}

fn download_blocking(agent: &ureq::Agent, url: &str, dest: &Path) -> HermitResult<u64> {
    debug!("GET {}", url);
    let response = agent
        .get(url)
        .header(
            "User-Agent",
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
        )
        .call()
        .map_err(|e| map_ureq_error(url, &e))?;

    let mut file = File::create(dest)
        .map_err(|e| HermitError::io(format!("creating {}", dest.display()), e))?;
    let written = std::io::copy(&mut response.into_body().as_reader(), &mut file)
        .map_err(|e| HermitError::fetch(url, format!("reading response body: {}", e)))?;
    file.flush()
        .and_then(|()| file.sync_all())
        .map_err(|e| HermitError::io(format!("writing {}", dest.display()), e))?;

    debug!("Downloaded {} bytes from {}", written, url);
    Ok(written)
}

/// Map a ureq error to a fetch error, marking which ones are worth retrying
fn map_ureq_error(url: &str, err: &ureq::Error) -> HermitError {
    match err {
        ureq::Error::StatusCode(code) => HermitError::Fetch {
            url: url.to_string(),
            reason: format!("HTTP status {}", code),
            retryable: is_retryable_status(*code),
        },
        other => HermitError::fetch(url, other.to_string()),
    }
}

fn is_retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || code >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_final() {
        let err = map_ureq_error("https://example.com/x", &ureq::Error::StatusCode(404));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(map_ureq_error("u", &ureq::Error::StatusCode(503)).is_retryable());
        assert!(map_ureq_error("u", &ureq::Error::StatusCode(429)).is_retryable());
        assert!(!map_ureq_error("u", &ureq::Error::StatusCode(403)).is_retryable());
    }
}
