//! CLI command implementations

pub mod completions;
pub mod config;
pub mod fetch_deps;
pub mod generate_env;
pub mod inject_files;
pub mod merge_sboms;

pub use completions::execute as completions;
pub use config::execute as config;
pub use fetch_deps::execute as fetch_deps;
pub use generate_env::execute as generate_env;
pub use inject_files::execute as inject_files;
pub use merge_sboms::execute as merge_sboms;

use crate::error::{HermitError, HermitResult};
use std::path::{Path, PathBuf};

/// Make `path` absolute against the current directory without touching the filesystem
pub(crate) fn absolute(path: &Path) -> HermitResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| HermitError::io("getting current directory", e))?;
    Ok(cwd.join(path))
}
