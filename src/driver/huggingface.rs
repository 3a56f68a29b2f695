//! Hugging Face driver (experimental)
//!
//! Fetches pinned model and dataset files listed in `huggingface.lock.yaml`
//! into a hub cache that hub clients can read offline.

use super::{display_path, index_fetched, load_yaml_lockfile, lockfile_path, Driver, DriverContext};
use crate::cache::{HubCache, HubFile, HubRepo, RepoKind, DEPS_DIR};
use crate::checksum::ChecksumInfo;
use crate::error::{HermitError, HermitResult};
use crate::fetch::scm::validate_revision;
use crate::fetch::{Artifact, ArtifactSource};
use crate::output::{EnvironmentVariable, RequestOutput};
use crate::remap::PLACEHOLDER;
use crate::request::PackageRequest;
use crate::sbom::{properties, Component, PackageUrl};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const ECOSYSTEM: &str = "x-huggingface";
pub const LOCKFILE_NAME: &str = "huggingface.lock.yaml";

/// File name patterns that run code when a client loads them
const UNSAFE_FILE_PATTERNS: &[&str] = &[
    "*.bin",
    "*.pt",
    "*.pkl",
    "*.pickle",
    "modeling_*.py",
    "*.pth",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HuggingFaceLockfile {
    #[allow(dead_code)]
    metadata: serde_yaml::Value,
    #[serde(default)]
    models: Vec<LockedRepo>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockedRepo {
    repository: String,
    revision: String,
    #[serde(default, rename = "type")]
    kind: RepoKind,
    #[serde(default = "default_ref", rename = "ref")]
    ref_name: String,
    #[serde(default)]
    files: Vec<LockedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LockedFile {
    path: String,
    #[serde(default)]
    checksum: Option<String>,
}

fn default_ref() -> String {
    "main".to_string()
}

/// Single `*` glob over a file's base name
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}

fn unsafe_files(repo: &LockedRepo) -> Vec<&str> {
    repo.files
        .iter()
        .map(|f| f.path.as_str())
        .filter(|path| UNSAFE_FILE_PATTERNS.iter().any(|p| matches_pattern(path, p)))
        .collect()
}

fn repo_url(endpoint: &str, repo: &HubRepo) -> String {
    match repo.kind {
        RepoKind::Model => format!("{}/{}", endpoint, repo.repository()),
        RepoKind::Dataset => format!("{}/datasets/{}", endpoint, repo.repository()),
    }
}

fn purl(repo: &HubRepo, revision: &str) -> String {
    let mut purl = PackageUrl::new("huggingface", &repo.name).with_version(revision);
    if let Some(namespace) = &repo.namespace {
        purl = purl.with_namespace(namespace);
    }
    purl.to_string()
}

fn environment_variables() -> Vec<EnvironmentVariable> {
    let root = format!("{}/{}/huggingface", PLACEHOLDER, DEPS_DIR);
    vec![
        EnvironmentVariable::path("HF_HOME", &root),
        EnvironmentVariable::path("HF_HUB_CACHE", format!("{}/hub", root)),
        EnvironmentVariable::path("HUGGINGFACE_HUB_CACHE", format!("{}/hub", root)),
        EnvironmentVariable::path("HF_DATASETS_CACHE", format!("{}/datasets", root)),
        EnvironmentVariable::literal("HF_HUB_OFFLINE", "1"),
        EnvironmentVariable::literal("HF_DATASETS_OFFLINE", "1"),
    ]
}

/// Fetches hub repositories pinned to a commit
pub struct HuggingFaceDriver;

impl HuggingFaceDriver {
    async fn fetch_repo(
        &self,
        locked: &LockedRepo,
        lockfile: &Path,
        ctx: &DriverContext,
    ) -> HermitResult<Component> {
        let repo = HubRepo::parse(locked.kind, &locked.repository)?;
        validate_revision(&locked.revision)?;
        info!("Fetching {} at revision {}", repo.repository(), locked.revision);

        let unsafe_files = unsafe_files(locked);
        if !unsafe_files.is_empty() {
            ctx.warnings.record(format!(
                "{} includes files that execute code when loaded: {}. Prefer *.safetensors",
                repo.repository(),
                unsafe_files.join(", ")
            ));
        }

        let endpoint = ctx.config.huggingface.endpoint.trim_end_matches('/');
        let base_url = repo_url(endpoint, &repo);
        let mut artifacts = Vec::with_capacity(locked.files.len());
        for file in &locked.files {
            let checksums = match &file.checksum {
                Some(value) => vec![ChecksumInfo::parse(value)?],
                None => Vec::new(),
            };
            let url = format!("{}/resolve/{}/{}", base_url, locked.revision, file.path);
            artifacts.push(Artifact::new(ArtifactSource::Url(url), checksums));
        }
        let urls: Vec<String> = artifacts.iter().map(|a| a.source.to_string()).collect();
        let fetched = index_fetched(ctx.fetcher.fetch_all(artifacts, &ctx.cancel).await?);

        let mut files = Vec::new();
        let mut unverified = false;
        for (file, url) in locked.files.iter().zip(&urls) {
            let Some(artifact) = fetched.get(url) else {
                continue;
            };
            unverified |= artifact.unverified;
            files.push(HubFile {
                path: file.path.clone(),
                sha256: artifact.sha256.clone(),
                blob: artifact.blob.clone(),
            });
        }

        let cache = HubCache::new(&ctx.output_root);
        cache.place_snapshot(&repo, &locked.revision, &locked.ref_name, &files)?;

        let mut component = Component::new(
            repo.repository(),
            Some(&locked.revision),
            purl(&repo, &locked.revision),
        )
        .with_distribution(base_url)
        .with_property(properties::FOUND_BY, properties::FOUND_BY_VALUE);
        if unverified {
            component =
                component.with_property(properties::MISSING_HASH_IN_FILE, display_path(ctx, lockfile));
        }
        Ok(component)
    }
}

#[async_trait]
impl Driver for HuggingFaceDriver {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    async fn fetch(&self, request: &PackageRequest, ctx: &DriverContext) -> HermitResult<RequestOutput> {
        let lockfile_path = lockfile_path(request, LOCKFILE_NAME)?;
        info!("Reading Hugging Face lockfile {}", lockfile_path.display());
        let lockfile: HuggingFaceLockfile = load_yaml_lockfile(&lockfile_path).await?;

        let datasets = ctx.output_root.join(DEPS_DIR).join("huggingface/datasets");
        tokio::fs::create_dir_all(&datasets)
            .await
            .map_err(|e| HermitError::io(format!("creating {}", datasets.display()), e))?;

        let mut output = RequestOutput {
            environment_variables: environment_variables(),
            ..RequestOutput::default()
        };
        for locked in &lockfile.models {
            let component = self.fetch_repo(locked, &lockfile_path, ctx).await?;
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

    const REVISION: &str = "0123456789abcdef0123456789abcdef01234567";
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn unsafe_patterns_match_base_names() {
        assert!(matches_pattern("weights/pytorch_model.bin", "*.bin"));
        assert!(matches_pattern("modeling_gpt2.py", "modeling_*.py"));
        assert!(!matches_pattern("model.safetensors", "*.bin"));
        assert!(!matches_pattern("config.json", "modeling_*.py"));
    }

    #[test]
    fn purl_includes_namespace_and_revision() {
        let repo = HubRepo::parse(RepoKind::Model, "openai/whisper-tiny").unwrap();
        assert_eq!(
            purl(&repo, REVISION),
            format!("pkg:huggingface/openai/whisper-tiny@{}", REVISION)
        );
        let dataset = HubRepo::parse(RepoKind::Dataset, "squad").unwrap();
        assert_eq!(
            repo_url("https://huggingface.co", &dataset),
            "https://huggingface.co/datasets/squad"
        );
    }

    #[tokio::test]
    async fn fetches_snapshot_into_hub_cache() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            source.path().join(LOCKFILE_NAME),
            format!(
                "metadata:\n  version: \"1.0\"\nmodels:\n  - repository: acme/tiny\n    revision: {}\n    files:\n      - path: config.json\n        checksum: sha256:{}\n",
                REVISION, HELLO_SHA256
            ),
        )
        .unwrap();
        let url = format!("https://huggingface.co/acme/tiny/resolve/{}/config.json", REVISION);
        let downloader = StaticDownloader::new().with(&url, b"hello");
        let ctx = context(source.path(), output.path(), downloader, Mode::Strict, Config::default());

        let result = HuggingFaceDriver
            .fetch(&request(source.path(), "x-huggingface"), &ctx)
            .await
            .unwrap();

        let repo_dir = output.path().join("deps/huggingface/hub/models--acme--tiny");
        assert_eq!(
            std::fs::read(repo_dir.join("snapshots").join(REVISION).join("config.json")).unwrap(),
            b"hello"
        );
        assert_eq!(
            std::fs::read_to_string(repo_dir.join("refs/main")).unwrap(),
            REVISION
        );
        assert_eq!(result.components[0].name, "acme/tiny");
        assert!(result
            .environment_variables
            .iter()
            .any(|v| v.name == "HF_HUB_OFFLINE" && v.value == "1"));
    }

    #[tokio::test]
    async fn short_revision_is_rejected() {
        let source = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            source.path().join(LOCKFILE_NAME),
            "metadata:\n  version: \"1.0\"\nmodels:\n  - repository: gpt2\n    revision: main\n",
        )
        .unwrap();
        let ctx = context(source.path(), output.path(), StaticDownloader::new(), Mode::Strict, Config::default());

        let err = HuggingFaceDriver
            .fetch(&request(source.path(), "x-huggingface"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GitInvalidRevision);
    }
}
