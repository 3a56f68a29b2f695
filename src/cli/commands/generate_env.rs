//! Generate-env command - render the build environment for an output directory

use super::absolute;
use crate::cli::args::GenerateEnvArgs;
use crate::envfile::{generate_envfile, EnvFormat};
use crate::error::{HermitError, HermitResult};
use crate::output::BuildConfig;
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Execute the generate-env command
pub async fn execute(args: GenerateEnvArgs) -> HermitResult<()> {
    let output_dir = absolute(&args.output_dir)?;
    let build_config = BuildConfig::load(&output_dir).await?;

    let format = select_format(args.format, args.output.as_deref())?;
    let for_output_dir = match args.for_output_dir {
        Some(ref path) => absolute(path)?,
        None => output_dir.clone(),
    };
    let content = generate_envfile(&build_config, format, &for_output_dir)?;

    match args.output {
        Some(path) => {
            fs::write(&path, content)
                .await
                .map_err(|e| HermitError::io(format!("writing {}", path.display()), e))?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(&ctx, "Env file written", &path.display().to_string());
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// An explicit format wins, then the output file suffix, then env
fn select_format(explicit: Option<EnvFormat>, output: Option<&Path>) -> HermitResult<EnvFormat> {
    match (explicit, output) {
        (Some(format), _) => Ok(format),
        (None, Some(path)) => EnvFormat::based_on_suffix(path),
        (None, None) => Ok(EnvFormat::Env),
    }
}
