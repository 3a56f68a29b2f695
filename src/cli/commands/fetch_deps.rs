//! Fetch-deps command - download, verify and record dependencies

use super::absolute;
use crate::cli::args::FetchDepsArgs;
use crate::config::Config;
use crate::driver::DriverRegistry;
use crate::error::{HermitError, HermitResult};
use crate::fetch::{FetchObserver, FetchOptions, FetchOrchestrator, HttpDownloader};
use crate::request::{Flag, RawRequest};
use crate::rooted_path::RootedPath;
use crate::ui::{self, DownloadProgress, TaskSpinner, UiContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Execute the fetch-deps command
pub async fn execute(args: FetchDepsArgs, config: &Config) -> HermitResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "hermit fetch-deps");

    let source = resolve_source(&args.source).await?;
    let output = absolute(&args.output)?;
    debug!("Source: {}, output: {}", source.display(), output.display());

    let mut flags = Vec::new();
    if args.dev_package_managers {
        flags.push(Flag::DevPackageManagers);
    }
    let request = RawRequest::parse(&args.request)?.normalize(&RootedPath::new(&source), &flags)?;
    let request_count = request.packages.len();

    let downloader = Arc::new(HttpDownloader::new(config.fetch.requests_timeout()));
    let progress = Arc::new(DownloadProgress::new(&ctx));
    let observer: Arc<dyn FetchObserver> = progress.clone();
    let orchestrator = FetchOrchestrator::new(DriverRegistry::builtin(), config.clone(), downloader)
        .with_observer(observer);

    let opts = FetchOptions {
        source_root: source,
        output_root: output.clone(),
        mode: args.mode,
    };
    // Dropping the run aborts its driver tasks
    let result = tokio::select! {
        result = orchestrator.run(request, &opts) => result,
        _ = tokio::signal::ctrl_c() => Err(HermitError::Cancelled),
    };
    progress.finish();
    let report = result?;

    ui::step_ok_detail(
        &ctx,
        &format!("Fetched {} package request(s)", request_count),
        &format!("{} components", report.sbom.components.len()),
    );

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Writing SBOM and build config...");
    if let Err(e) = report.write_outputs(&output).await {
        spinner.stop_error("Failed to write outputs");
        return Err(e);
    }
    spinner.stop("Wrote bom.json and .build-config.json");

    for warning in &report.warnings {
        ui::step_warn(&ctx, warning);
    }
    ui::key_value(&ctx, "Output", &output.display().to_string());

    if report.warnings.is_empty() {
        ui::outro_success(&ctx, "Dependencies fetched");
    } else {
        ui::outro_warn(
            &ctx,
            &format!("Dependencies fetched with {} warning(s)", report.warnings.len()),
        );
    }
    Ok(())
}

/// The source directory as a canonical absolute path
async fn resolve_source(source: &Path) -> HermitResult<PathBuf> {
    let path = absolute(source)?;
    let canonical = fs::canonicalize(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HermitError::InvalidInput(format!(
                "Source directory does not exist: {}",
                path.display()
            ))
        } else {
            HermitError::io(format!("resolving {}", path.display()), e)
        }
    })?;
    if !canonical.is_dir() {
        return Err(HermitError::InvalidInput(format!(
            "Source is not a directory: {}",
            canonical.display()
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_source_is_invalid_input() {
        let temp = TempDir::new().unwrap();
        let err = resolve_source(&temp.path().join("nope")).await.unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn source_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            resolve_source(&file).await,
            Err(HermitError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn source_is_canonicalized() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("app")).unwrap();
        let resolved = resolve_source(&temp.path().join("app/../app")).await.unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("app"));
    }
}
