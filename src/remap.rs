//! Output path remapping
//!
//! Files are fetched into one directory but the build may mount them
//! somewhere else. Values that embed the output directory are stored against
//! [`PLACEHOLDER`] and resolved once for the mount path the build will use.

use crate::output::{BuildConfig, EnvironmentVariable, ProjectFileEdit};
use std::path::Path;

/// Stands for the output directory in stored values
pub const PLACEHOLDER: &str = "${output_dir}";

/// Replace occurrences of `output_root` with the placeholder.
///
/// Only whole path components match, so `/tmp/out` leaves `/tmp/output2` alone.
pub fn templatize(value: &str, output_root: &Path) -> String {
    let root = output_root.to_string_lossy();
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return value.to_string();
    }

    let mut templated = String::with_capacity(value.len());
    let mut copied = 0;
    for (start, _) in value.match_indices(root) {
        let end = start + root.len();
        let before = value[..start].chars().next_back();
        let after = value[end..].chars().next();
        if before.is_some_and(|c| !is_boundary(c)) || after.is_some_and(|c| !is_boundary(c)) {
            continue;
        }
        templated.push_str(&value[copied..start]);
        templated.push_str(PLACEHOLDER);
        copied = end;
    }
    templated.push_str(&value[copied..]);
    templated
}

/// Characters that cannot continue a path component name
fn is_boundary(c: char) -> bool {
    !(c.is_alphanumeric() || "-_.~+@%".contains(c))
}

/// Substitute the placeholder with `target`
pub fn resolve(value: &str, target: &Path) -> String {
    value.replace(PLACEHOLDER, &target.to_string_lossy())
}

/// Resolve every variable and edit in `config` for `target`.
///
/// Relative path-kind variables are joined onto `target`.
pub fn resolve_build_config(config: &BuildConfig, target: &Path) -> BuildConfig {
    let environment_variables = config
        .environment_variables
        .iter()
        .map(|var| {
            let value = resolve(&var.value, target);
            let value = if var.is_path_like() && Path::new(&value).is_relative() {
                target.join(&value).to_string_lossy().into_owned()
            } else {
                value
            };
            EnvironmentVariable {
                value,
                ..var.clone()
            }
        })
        .collect();

    let project_file_edits = config
        .project_file_edits
        .iter()
        .map(|edit| ProjectFileEdit {
            locator_old_value: resolve(&edit.locator_old_value, target),
            locator_new_value: resolve(&edit.locator_new_value, target),
            ..edit.clone()
        })
        .collect();

    BuildConfig {
        source_root: config.source_root.clone(),
        environment_variables,
        project_file_edits,
    }
}
