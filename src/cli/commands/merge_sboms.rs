//! Merge-sboms command

use crate::cli::args::MergeSbomsArgs;
use crate::error::HermitResult;
use crate::sbom::{self, merge_sboms};
use crate::ui::{self, UiContext};

/// Execute the merge-sboms command
pub async fn execute(args: MergeSbomsArgs) -> HermitResult<()> {
    let mut documents = Vec::with_capacity(args.sboms.len());
    for path in &args.sboms {
        documents.push(sbom::read_sbom(path).await?);
    }
    let merged = merge_sboms(documents)?;

    match args.output {
        Some(path) => {
            sbom::write_sbom(&path, &merged).await?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(
                &ctx,
                &format!("Merged {} SBOMs", args.sboms.len()),
                &path.display().to_string(),
            );
        }
        None => print!("{}", merged.to_json()?),
    }
    Ok(())
}
