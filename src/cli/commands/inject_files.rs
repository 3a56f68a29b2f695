//! Inject-files command - point project files at the fetched artifacts

use super::absolute;
use crate::cli::args::InjectFilesArgs;
use crate::error::HermitResult;
use crate::inject;
use crate::output::BuildConfig;
use crate::remap;
use crate::ui::{self, UiContext};
use tracing::debug;

/// Execute the inject-files command
pub async fn execute(args: InjectFilesArgs) -> HermitResult<()> {
    let ctx = UiContext::detect();
    let output_dir = absolute(&args.output_dir)?;
    let build_config = BuildConfig::load(&output_dir).await?;

    let for_output_dir = match args.for_output_dir {
        Some(ref path) => absolute(path)?,
        None => output_dir,
    };
    let resolved = remap::resolve_build_config(&build_config, &for_output_dir);
    debug!(
        "Applying {} edits under {}",
        resolved.project_file_edits.len(),
        resolved.source_root.display()
    );

    let changed = inject::apply_edits(&resolved.source_root, &resolved.project_file_edits).await?;
    if changed.is_empty() {
        ui::step_info(&ctx, "Project files already up to date");
    } else {
        for path in &changed {
            ui::step_ok_detail(&ctx, "Updated", &path.display().to_string());
        }
    }
    Ok(())
}
