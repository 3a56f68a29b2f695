//! Generic driver: arbitrary files listed in `artifacts.lock.yaml`
//!
//! ```yaml
//! metadata:
//!   version: "1.0"
//! artifacts:
//!   - download_url: https://example.com/tool-1.2.tar.gz
//!     checksum: sha256:...
//!     filename: tool.tar.gz        # optional, defaults to the URL's last segment
//! ```

use super::{display_path, index_fetched, load_yaml_lockfile, lockfile_path, Driver, DriverContext};
use crate::cache::{place, Layout};
use crate::checksum::ChecksumInfo;
use crate::error::{HermitError, HermitResult};
use crate::fetch::{Artifact, ArtifactSource};
use crate::output::RequestOutput;
use crate::request::PackageRequest;
use crate::sbom::{properties, Component, PackageUrl};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

pub const ECOSYSTEM: &str = "generic";
pub const LOCKFILE_NAME: &str = "artifacts.lock.yaml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenericLockfile {
    #[allow(dead_code)]
    metadata: serde_yaml::Value,
    #[serde(default)]
    artifacts: Vec<LockfileArtifact>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockfileArtifact {
    download_url: String,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    checksums: Vec<String>,
    #[serde(default)]
    filename: Option<String>,
}

/// A lockfile entry after validation
#[derive(Debug, Clone, PartialEq)]
struct GenericEntry {
    url: String,
    filename: String,
    checksums: Vec<ChecksumInfo>,
}

impl GenericEntry {
    fn component(&self) -> Component {
        let checksum = self
            .checksums
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let purl = PackageUrl::new(ECOSYSTEM, &self.filename)
            .with_qualifier("download_url", &self.url)
            .with_qualifier("checksum", checksum);
        Component::new(&self.filename, None, purl.to_string())
            .with_distribution(&self.url)
            .with_property(properties::FOUND_BY, properties::FOUND_BY_VALUE)
    }
}

fn resolve_entries(path: &Path, lockfile: GenericLockfile) -> HermitResult<Vec<GenericEntry>> {
    let invalid = |reason: String| HermitError::InvalidLockfileFormat {
        path: path.to_path_buf(),
        reason,
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(lockfile.artifacts.len());
    for artifact in lockfile.artifacts {
        let url = url::Url::parse(&artifact.download_url)
            .map_err(|e| invalid(format!("invalid download_url {:?}: {}", artifact.download_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "download_url must use http or https: {}",
                artifact.download_url
            )));
        }

        let filename = match artifact.filename {
            Some(name) => name,
            None => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    invalid(format!(
                        "cannot derive a file name from {}, set 'filename'",
                        artifact.download_url
                    ))
                })?,
        };
        if !seen.insert(filename.clone()) {
            return Err(invalid(format!("duplicate filename: {}", filename)));
        }

        let mut checksums = Vec::new();
        for value in artifact.checksum.iter().chain(&artifact.checksums) {
            checksums.push(ChecksumInfo::parse(value)?);
        }

        entries.push(GenericEntry {
            url: artifact.download_url,
            filename,
            checksums,
        });
    }
    Ok(entries)
}

/// Fetches files listed in a generic lockfile into `deps/generic/`
pub struct GenericDriver;

#[async_trait]
impl Driver for GenericDriver {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    async fn fetch(&self, request: &PackageRequest, ctx: &DriverContext) -> HermitResult<RequestOutput> {
        let lockfile = lockfile_path(request, LOCKFILE_NAME)?;
        info!("Reading generic lockfile {}", lockfile.display());
        let entries = resolve_entries(&lockfile, load_yaml_lockfile(&lockfile).await?)?;

        let artifacts = entries
            .iter()
            .map(|e| Artifact::new(ArtifactSource::Url(e.url.clone()), e.checksums.clone()))
            .collect();
        let fetched = index_fetched(ctx.fetcher.fetch_all(artifacts, &ctx.cancel).await?);

        let mut output = RequestOutput::default();
        for entry in entries {
            let Some(artifact) = fetched.get(&entry.url) else {
                continue;
            };
            let layout = Layout::FlatName {
                ecosystem: ECOSYSTEM.to_string(),
                file_name: entry.filename.clone(),
            };
            place(&ctx.output_root, &artifact.blob, &artifact.sha256, &layout)?;

            let mut component = entry.component();
            if artifact.unverified {
                component = component
                    .with_property(properties::MISSING_HASH_IN_FILE, display_path(ctx, &lockfile));
            }
            output.components.push(component);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::driver::testing::{context, request};
    use crate::error::ErrorKind;
    use crate::fetch::testing::StaticDownloader;
    use crate::request::Mode;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn write_lockfile(dir: &Path, content: &str) {
        std::fs::write(dir.join(LOCKFILE_NAME), content).unwrap();
    }

    #[tokio::test]
    async fn fetches_listed_artifacts() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_lockfile(
            source.path(),
            &format!(
                "metadata:\n  version: \"1.0\"\nartifacts:\n  - download_url: https://example.com/files/hello.txt\n    checksum: sha256:{}\n",
                HELLO_SHA256
            ),
        );
        let downloader = StaticDownloader::new().with("https://example.com/files/hello.txt", b"hello");
        let ctx = context(source.path(), output.path(), downloader, Mode::Strict, Config::default());

        let result = GenericDriver
            .fetch(&request(source.path(), "generic"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.components.len(), 1);
        assert_eq!(
            result.components[0].purl,
            format!(
                "pkg:generic/hello.txt?checksum=sha256:{}&download_url=https://example.com/files/hello.txt",
                HELLO_SHA256
            )
        );
        let placed = output.path().join("deps/generic/hello.txt");
        assert_eq!(std::fs::read(placed).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn permissive_missing_checksum_is_marked() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_lockfile(
            source.path(),
            "metadata:\n  version: \"1.0\"\nartifacts:\n  - download_url: https://example.com/a.bin\n    filename: renamed.bin\n",
        );
        let downloader = StaticDownloader::new().with("https://example.com/a.bin", b"hello");
        let ctx = context(source.path(), output.path(), downloader, Mode::Permissive, Config::default());

        let result = GenericDriver
            .fetch(&request(source.path(), "generic"), &ctx)
            .await
            .unwrap();

        let component = &result.components[0];
        assert_eq!(component.name, "renamed.bin");
        assert!(component
            .properties
            .iter()
            .any(|p| p.name == properties::MISSING_HASH_IN_FILE && p.value == LOCKFILE_NAME));
        assert_eq!(ctx.warnings.snapshot().len(), 1);
        assert!(output.path().join("deps/generic/renamed.bin").exists());
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_lockfile(source.path(), "metadata:\n  version: \"2.0\"\nartifacts: []\n");
        let ctx = context(source.path(), output.path(), StaticDownloader::new(), Mode::Strict, Config::default());

        let err = GenericDriver
            .fetch(&request(source.path(), "generic"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedLockfileVersion);
    }

    #[tokio::test]
    async fn missing_lockfile_is_reported() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let ctx = context(source.path(), output.path(), StaticDownloader::new(), Mode::Strict, Config::default());

        let err = GenericDriver
            .fetch(&request(source.path(), "generic"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockfileNotFound);
    }

    #[test]
    fn duplicate_filenames_are_invalid() {
        let lockfile: GenericLockfile = serde_yaml::from_str(
            "metadata: {version: '1.0'}\nartifacts:\n  - download_url: https://a.example/x.tgz\n  - download_url: https://b.example/x.tgz\n",
        )
        .unwrap();
        let err = resolve_entries(Path::new(LOCKFILE_NAME), lockfile).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLockfileFormat);
    }

    #[test]
    fn unknown_keys_are_invalid() {
        let parsed: Result<GenericLockfile, _> = serde_yaml::from_str(
            "metadata: {version: '1.0'}\nartifacts:\n  - download_url: https://a.example/x.tgz\n    sha: abc\n",
        );
        assert!(parsed.is_err());
    }
}
