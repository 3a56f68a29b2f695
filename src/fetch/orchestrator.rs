//! Fetch orchestration
//!
//! Runs the driver for every package request on a bounded pool, then merges
//! the drivers' outputs into one deterministic SBOM and build config.
//!
//! A failing request cancels the shared token: requests that have not started
//! are skipped, downloads that have not started are skipped, and in-flight
//! downloads drain before the run reports its error.

use super::artifact::{ArtifactFetcher, FetchObserver, NoProgress};
use super::download::Downloader;
use super::WarningLog;
use crate::cache::ContentStore;
use crate::config::Config;
use crate::driver::{DriverContext, DriverRegistry};
use crate::error::{HermitError, HermitResult};
use crate::output::{BuildConfig, EnvironmentVariable, ProjectFileEdit, RequestOutput, SBOM_FILE};
use crate::remap;
use crate::request::{Mode, Request};
use crate::rooted_path::RootedPath;
use crate::sbom::{self, Sbom};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where a run reads from and writes to
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub mode: Mode,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub sbom: Sbom,
    pub build_config: BuildConfig,
    /// Recoverable issues, in the order they were recorded
    pub warnings: Vec<String>,
}

impl FetchReport {
    /// Write `bom.json` and `.build-config.json` into `output_dir`
    pub async fn write_outputs(&self, output_dir: &Path) -> HermitResult<()> {
        sbom::write_sbom(&output_dir.join(SBOM_FILE), &self.sbom).await?;
        self.build_config.save(output_dir).await
    }
}

/// Runs drivers over a request
pub struct FetchOrchestrator {
    registry: Arc<DriverRegistry>,
    config: Arc<Config>,
    downloader: Arc<dyn Downloader>,
    observer: Arc<dyn FetchObserver>,
}

impl FetchOrchestrator {
    pub fn new(registry: DriverRegistry, config: Config, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(config),
            downloader,
            observer: Arc::new(NoProgress),
        }
    }

    /// Report download progress to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fetch everything `request` names
    pub async fn run(&self, request: Request, opts: &FetchOptions) -> HermitResult<FetchReport> {
        // Resolve every driver before any work starts
        let mut jobs = Vec::with_capacity(request.packages.len());
        for package in request.packages {
            let driver = self.registry.resolve(&package.ecosystem_type, &request.flags)?;
            jobs.push((driver, package));
        }

        tokio::fs::create_dir_all(&opts.output_root)
            .await
            .map_err(|e| HermitError::io(format!("creating {}", opts.output_root.display()), e))?;

        let warnings = WarningLog::default();
        let fetcher = ArtifactFetcher::new(
            Arc::clone(&self.downloader),
            ContentStore::new(&opts.output_root),
            opts.mode,
            &self.config.fetch,
            warnings.clone(),
        )
        .with_observer(Arc::clone(&self.observer));

        let cancel = CancellationToken::new();
        let base = DriverContext {
            source_root: RootedPath::new(&opts.source_root),
            output_root: opts.output_root.clone(),
            mode: opts.mode,
            flags: request.flags.clone(),
            fetcher: Arc::new(fetcher),
            config: Arc::clone(&self.config),
            cancel: cancel.clone(),
            warnings: warnings.clone(),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.fetch.concurrency_limit.max(1)));
        let mut join_set = JoinSet::new();
        for (index, (driver, package)) in jobs.into_iter().enumerate() {
            let ctx = DriverContext {
                cancel: cancel.child_token(),
                ..base.clone()
            };
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                if ctx.cancel.is_cancelled() {
                    return (index, Err(HermitError::Cancelled));
                }
                info!(
                    "Fetching {} dependencies in {}",
                    package.ecosystem_type,
                    package.root_path.path().display()
                );
                let result = driver.fetch(&package, &ctx).await;
                if result.is_err() {
                    cancel.cancel();
                }
                (index, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (index, result) =
                joined.map_err(|e| HermitError::Internal(format!("driver task failed: {}", e)))?;
            results.push((index, result));
        }
        results.sort_by_key(|(index, _)| *index);

        let mut outputs = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (_, result) in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => errors.push(e),
            }
        }
        if let Some(error) = select_error(errors) {
            return Err(error);
        }

        let mut combined = RequestOutput::default();
        for output in outputs {
            combined.extend(output);
        }
        let report = self.finish(combined, opts, warnings.snapshot())?;
        debug!(
            "Run produced {} components and {} variables",
            report.sbom.components.len(),
            report.build_config.environment_variables.len()
        );
        Ok(report)
    }

    fn finish(
        &self,
        output: RequestOutput,
        opts: &FetchOptions,
        warnings: Vec<String>,
    ) -> HermitResult<FetchReport> {
        let sbom = sbom::assemble(output.components)?;

        let mut variables = output.environment_variables;
        variables.extend(
            self.config
                .environment
                .default_variables
                .iter()
                .map(|(name, value)| EnvironmentVariable::literal(name, value)),
        );
        let environment_variables = merge_variables(variables, &opts.output_root)?;
        let project_file_edits = merge_edits(output.project_file_edits, &opts.output_root);

        Ok(FetchReport {
            sbom,
            build_config: BuildConfig {
                source_root: opts.source_root.clone(),
                environment_variables,
                project_file_edits,
            },
            warnings,
        })
    }
}

/// Pick the error to report: structural failures first, then the lowest
/// request index. Cancellations only surface when nothing else failed.
fn select_error(errors: Vec<HermitError>) -> Option<HermitError> {
    let mut cancelled = None;
    let mut first = None;
    let mut structural = None;
    for error in errors {
        if matches!(error, HermitError::Cancelled) {
            cancelled.get_or_insert(error);
        } else if error.is_structural() {
            if structural.is_none() {
                structural = Some(error);
            }
        } else if first.is_none() {
            first = Some(error);
        }
    }
    structural.or(first).or(cancelled)
}

/// Sort variables by name, collapsing identical duplicates
fn merge_variables(
    variables: Vec<EnvironmentVariable>,
    output_root: &Path,
) -> HermitResult<Vec<EnvironmentVariable>> {
    let mut by_name: BTreeMap<String, EnvironmentVariable> = BTreeMap::new();
    for mut variable in variables {
        variable.value = remap::templatize(&variable.value, output_root);
        match by_name.get(&variable.name) {
            Some(existing) if existing.value != variable.value || existing.kind != variable.kind => {
                return Err(HermitError::InvalidInput(format!(
                    "Conflicting values for environment variable {}: '{}' vs '{}'",
                    variable.name, existing.value, variable.value
                )));
            }
            Some(_) => {}
            None => {
                by_name.insert(variable.name.clone(), variable);
            }
        }
    }
    Ok(by_name.into_values().collect())
}

fn merge_edits(edits: Vec<ProjectFileEdit>, output_root: &Path) -> Vec<ProjectFileEdit> {
    let mut edits: Vec<ProjectFileEdit> = edits
        .into_iter()
        .map(|edit| ProjectFileEdit {
            locator_new_value: remap::templatize(&edit.locator_new_value, output_root),
            ..edit
        })
        .collect();
    edits.sort();
    edits.dedup();
    edits
}
