//! npm driver
//!
//! Reads `package-lock.json` (lockfile versions 2 and 3) and fetches every
//! package tarball it resolves to:
//!
//! | `resolved` | Placement under `deps/npm/` |
//! |------------|-----------------------------|
//! | registry tarball | `<scope>-<name>-<version>.tgz` |
//! | other https URL | `external-<name>/<name>-external-<alg>-<hash>.tgz` |
//! | git URL | `<host>/<namespace>/<repo>/<repo>-external-gitcommit-<rev>.tgz` |
//! | `file:` / bundled | not fetched, reported only |
//!
//! Each fetched `resolved` value is rewritten to the local tarball.

use super::{display_path, index_fetched, Driver, DriverContext};
use crate::cache::{place, Layout};
use crate::checksum::ChecksumInfo;
use crate::error::{HermitError, HermitResult};
use crate::fetch::scm::validate_revision;
use crate::fetch::{Artifact, ArtifactSource};
use crate::output::{ProjectFileEdit, RequestOutput};
use crate::remap::PLACEHOLDER;
use crate::request::PackageRequest;
use crate::sbom::{properties, Component, PackageUrl};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ECOSYSTEM: &str = "npm";
pub const LOCKFILE_NAME: &str = "package-lock.json";
const SUPPORTED_LOCKFILE_VERSIONS: &[u64] = &[2, 3];

/// Where one lockfile package comes from
#[derive(Debug, Clone, PartialEq)]
enum PackageSource {
    Registry { url: String },
    Https { url: String },
    Git { url: String, revision: String },
    Local,
    Bundled,
}

/// One entry of the lockfile `packages` map
#[derive(Debug, Clone, PartialEq)]
struct NpmPackage {
    name: String,
    version: Option<String>,
    resolved: Option<String>,
    integrity: Vec<ChecksumInfo>,
    dev: bool,
    source: PackageSource,
}

impl NpmPackage {
    fn scope_and_name(&self) -> (Option<&str>, &str) {
        match self.name.split_once('/') {
            Some((scope, name)) if scope.starts_with('@') => (Some(scope), name),
            _ => (None, self.name.as_str()),
        }
    }

    fn purl(&self) -> PackageUrl {
        let (scope, name) = self.scope_and_name();
        let mut purl = PackageUrl::new(ECOSYSTEM, name);
        if let Some(scope) = scope {
            purl = purl.with_namespace(scope);
        }
        if let Some(version) = &self.version {
            purl = purl.with_version(version);
        }
        match &self.source {
            PackageSource::Https { url } => purl.with_qualifier("download_url", url),
            PackageSource::Git { url, revision } => {
                purl.with_qualifier("vcs_url", format!("git+{}@{}", url, revision))
            }
            _ => purl,
        }
    }

    /// File name used in flat and external layouts
    fn flat_name(&self) -> String {
        let (scope, name) = self.scope_and_name();
        let version = self.version.as_deref().unwrap_or("0.0.0");
        match scope {
            Some(scope) => format!("{}-{}-{}.tgz", scope.trim_start_matches('@'), name, version),
            None => format!("{}-{}.tgz", name, version),
        }
    }

    fn artifact(&self) -> Option<Artifact> {
        let source = match &self.source {
            PackageSource::Registry { url } => ArtifactSource::Registry {
                name: self.name.clone(),
                version: self.version.clone().unwrap_or_default(),
                url: url.clone(),
            },
            PackageSource::Https { url } => ArtifactSource::Url(url.clone()),
            PackageSource::Git { url, revision } => {
                return Some(Artifact::new(
                    ArtifactSource::Git {
                        url: url.clone(),
                        revision: revision.clone(),
                    },
                    Vec::new(),
                ))
            }
            PackageSource::Local | PackageSource::Bundled => return None,
        };
        Some(Artifact::new(source, self.integrity.clone()))
    }

    fn layout(&self, sha256: &str) -> HermitResult<Layout> {
        let ecosystem = ECOSYSTEM.to_string();
        match &self.source {
            PackageSource::Registry { .. } => Ok(Layout::FlatName {
                ecosystem,
                file_name: self.flat_name(),
            }),
            PackageSource::Https { .. } => {
                let bucket = self.name.trim_start_matches('@').replace('/', "-");
                let (algorithm, digest) = match self.integrity.first() {
                    Some(checksum) => (checksum.algorithm.name(), checksum.hex_digest.as_str()),
                    None => ("sha256", sha256),
                };
                Ok(Layout::ExternalBucket {
                    ecosystem,
                    file_name: format!("{}-external-{}-{}.tgz", bucket, algorithm, digest),
                    bucket,
                })
            }
            PackageSource::Git { url, revision } => {
                let (host, namespace, repo) = git_url_parts(url)?;
                Ok(Layout::Vcs {
                    ecosystem,
                    file_name: format!("{}-external-gitcommit-{}.tgz", repo, revision),
                    host,
                    namespace,
                    repo,
                })
            }
            PackageSource::Local | PackageSource::Bundled => Err(HermitError::Internal(format!(
                "{} is not fetched",
                self.name
            ))),
        }
    }
}

/// Split a git clone URL into host, namespace and repository name.
///
/// Handles `scheme://host/ns/repo.git` and `user@host:ns/repo.git`.
fn git_url_parts(clone_url: &str) -> HermitResult<(String, String, String)> {
    let rejected = || HermitError::PackageRejected {
        reason: format!("Cannot parse git URL: {}", clone_url),
        solution: "Ensure the git dependency has a valid URL.".to_string(),
    };

    let (host, path) = if clone_url.contains("://") {
        let url = url::Url::parse(clone_url).map_err(|_| rejected())?;
        let host = url.host_str().ok_or_else(rejected)?.to_string();
        (host, url.path().to_string())
    } else {
        let (_, rest) = clone_url.split_once('@').ok_or_else(rejected)?;
        let (host, path) = rest.split_once(':').ok_or_else(rejected)?;
        (host.to_string(), path.to_string())
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (namespace, repo) = match path.rsplit_once('/') {
        Some((namespace, repo)) => (namespace.to_string(), repo.to_string()),
        None => (String::new(), path.to_string()),
    };
    if host.is_empty() || repo.is_empty() {
        return Err(rejected());
    }
    Ok((host, namespace, repo))
}

fn classify(resolved: &str, registry: &str, bundled: bool) -> HermitResult<PackageSource> {
    if bundled {
        return Ok(PackageSource::Bundled);
    }
    if resolved.starts_with("file:") {
        return Ok(PackageSource::Local);
    }
    if let Some(rest) = resolved
        .strip_prefix("git+")
        .or_else(|| resolved.starts_with("git:").then_some(resolved))
    {
        let (url, revision) = rest.split_once('#').ok_or_else(|| HermitError::PackageRejected {
            reason: format!("git dependency is not pinned to a commit: {}", resolved),
            solution: "Regenerate package-lock.json so every git dependency records a commit.".to_string(),
        })?;
        validate_revision(revision)?;
        return Ok(PackageSource::Git {
            url: url.to_string(),
            revision: revision.to_string(),
        });
    }
    if resolved.starts_with(&format!("{}/", registry)) {
        return Ok(PackageSource::Registry {
            url: resolved.to_string(),
        });
    }
    if resolved.starts_with("https://") || resolved.starts_with("http://") {
        return Ok(PackageSource::Https {
            url: resolved.to_string(),
        });
    }
    Err(HermitError::UnsupportedFeature {
        reason: format!("Unsupported npm dependency source: {}", resolved),
        solution: Some(
            "Supported sources are registry tarballs, https tarballs, git commits and local files."
                .to_string(),
        ),
    })
}

fn package_name(key: &str, entry: &Value) -> String {
    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        return name.to_string();
    }
    match key.rfind("node_modules/") {
        Some(index) => key[index + "node_modules/".len()..].to_string(),
        None => key.rsplit('/').next().unwrap_or(key).to_string(),
    }
}

/// Parse the lockfile content into packages
fn parse_lockfile(path: &Path, content: &str, registry: &str) -> HermitResult<Vec<NpmPackage>> {
    let invalid = |reason: String| HermitError::InvalidLockfileFormat {
        path: path.to_path_buf(),
        reason,
    };
    let lockfile: Value = serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

    let version = lockfile
        .get("lockfileVersion")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("missing lockfileVersion".to_string()))?;
    if !SUPPORTED_LOCKFILE_VERSIONS.contains(&version) {
        return Err(HermitError::UnsupportedLockfileVersion {
            path: path.to_path_buf(),
            version: version.to_string(),
        });
    }

    let entries = lockfile
        .get("packages")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing 'packages'".to_string()))?;

    let mut packages = Vec::new();
    for (key, entry) in entries {
        if key.is_empty() || entry.get("link").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        let resolved = entry.get("resolved").and_then(Value::as_str).map(str::to_string);
        let bundled = entry.get("inBundle").and_then(Value::as_bool).unwrap_or(false);
        let source = match &resolved {
            Some(resolved) => classify(resolved, registry, bundled)?,
            None if bundled => PackageSource::Bundled,
            // workspace packages and linked directories
            None => PackageSource::Local,
        };
        let integrity = match entry.get("integrity").and_then(Value::as_str) {
            Some(value) => ChecksumInfo::parse_sri(value)?,
            None => Vec::new(),
        };

        packages.push(NpmPackage {
            name: package_name(key, entry),
            version: entry.get("version").and_then(Value::as_str).map(str::to_string),
            resolved,
            integrity,
            dev: entry.get("dev").and_then(Value::as_bool).unwrap_or(false),
            source,
        });
    }
    Ok(packages)
}

/// Fail when package.json names a dependency the lockfile does not install
fn check_in_sync(lockfile: &Path, manifest: &Value, lockfile_content: &str) -> HermitResult<()> {
    let lock: Value = serde_json::from_str(lockfile_content)?;
    let installed = lock.get("packages").and_then(Value::as_object);

    for section in ["dependencies", "devDependencies"] {
        let Some(deps) = manifest.get(section).and_then(Value::as_object) else {
            continue;
        };
        for name in deps.keys() {
            let key = format!("node_modules/{}", name);
            if !installed.is_some_and(|packages| packages.contains_key(&key)) {
                return Err(HermitError::LockfileOutOfSync {
                    path: lockfile.to_path_buf(),
                    reason: format!("{} '{}' is missing from the lockfile", section, name),
                });
            }
        }
    }
    Ok(())
}

/// Fetches packages locked in `package-lock.json`
pub struct NpmDriver;

#[async_trait]
impl Driver for NpmDriver {
    fn ecosystem(&self) -> &'static str {
        ECOSYSTEM
    }

    async fn fetch(&self, request: &PackageRequest, ctx: &DriverContext) -> HermitResult<RequestOutput> {
        let lockfile = request.root_path.join_within_root(LOCKFILE_NAME)?.path();
        let content = match tokio::fs::read_to_string(&lockfile).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HermitError::LockfileNotFound(lockfile))
            }
            Err(e) => return Err(HermitError::io(format!("reading {}", lockfile.display()), e)),
        };
        info!("Reading npm lockfile {}", lockfile.display());

        let manifest_path = request.root_path.join_within_root("package.json")?.path();
        if let Ok(manifest) = tokio::fs::read_to_string(&manifest_path).await {
            let manifest: Value = serde_json::from_str(&manifest).map_err(|e| {
                HermitError::PackageManager {
                    reason: format!("{} is not valid JSON: {}", manifest_path.display(), e),
                    solution: None,
                }
            })?;
            check_in_sync(&lockfile, &manifest, &content)?;
        }

        let registry = ctx.config.npm.registry.trim_end_matches('/');
        let packages = parse_lockfile(&lockfile, &content, registry)?;

        let mut scheduled = HashSet::new();
        let artifacts: Vec<Artifact> = packages
            .iter()
            .filter_map(NpmPackage::artifact)
            .filter(|a| scheduled.insert(a.source.to_string()))
            .collect();
        debug!("{} npm artifacts to fetch", artifacts.len());
        let fetched = index_fetched(ctx.fetcher.fetch_all(artifacts, &ctx.cancel).await?);

        let lockfile_display = display_path(ctx, &lockfile);
        let lockfile_relative = PathBuf::from(&lockfile_display);
        let mut output = RequestOutput::default();
        for package in &packages {
            let mut component = Component::new(
                &package.name,
                package.version.as_deref(),
                package.purl().to_string(),
            )
            .with_property(properties::FOUND_BY, properties::FOUND_BY_VALUE);
            if package.dev {
                component = component.with_property(properties::NPM_DEVELOPMENT, "true");
            }

            if let Some(artifact) = package.artifact() {
                let Some(fetched) = fetched.get(&artifact.source.to_string()) else {
                    continue;
                };
                let layout = package.layout(&fetched.sha256)?;
                place(&ctx.output_root, &fetched.blob, &fetched.sha256, &layout)?;

                if let Some(resolved) = &package.resolved {
                    component = component.with_distribution(resolved);
                    output.project_file_edits.push(ProjectFileEdit {
                        file_path: lockfile_relative.clone(),
                        locator_old_value: resolved.clone(),
                        locator_new_value: format!(
                            "file:{}/{}",
                            PLACEHOLDER,
                            layout.relative_path().to_string_lossy()
                        ),
                    });
                }
                if fetched.unverified {
                    component = component
                        .with_property(properties::MISSING_HASH_IN_FILE, &lockfile_display);
                }
            } else if package.source == PackageSource::Bundled {
                component = component.with_property(properties::NPM_BUNDLED, "true");
            }

            output.components.push(component);
        }
        Ok(output)
    }
}
