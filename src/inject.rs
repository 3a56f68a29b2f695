//! Project file injection
//!
//! Rewrites manifests and lockfiles in the source tree so that they point at
//! the prefetched artifacts instead of the network.

use crate::error::{HermitError, HermitResult};
use crate::output::ProjectFileEdit;
use crate::rooted_path::RootedPath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// npm lockfiles that get the VCS integrity stripper applied
const NPM_LOCKFILES: &[&str] = &["package-lock.json", "npm-shrinkwrap.json"];

/// Replace every `old` with `new`, leaving occurrences of `old` that already
/// sit inside an occurrence of `new` untouched.
pub fn replace_idempotent(content: &str, old: &str, new: &str) -> String {
    if old.is_empty() || old == new {
        return content.to_string();
    }

    let protected: Vec<(usize, usize)> = content
        .match_indices(new)
        .map(|(start, m)| (start, start + m.len()))
        .collect();

    let mut result = String::with_capacity(content.len());
    let mut last = 0;
    for (start, m) in content.match_indices(old) {
        let end = start + m.len();
        if protected.iter().any(|&(s, e)| s <= start && end <= e) {
            continue;
        }
        result.push_str(&content[last..start]);
        result.push_str(new);
        last = end;
    }
    result.push_str(&content[last..]);
    result
}

fn is_vcs_locator(value: &str) -> bool {
    value.starts_with("git+") || value.starts_with("git:") || value.contains("-external-gitcommit-")
}

fn strip_entry(entry: &mut Value) -> bool {
    let Some(object) = entry.as_object_mut() else {
        return false;
    };

    let points_at_vcs = ["resolved", "version"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .any(is_vcs_locator);

    let mut changed = points_at_vcs && object.remove("integrity").is_some();

    // lockfile v1/v2 nest transitive dependencies
    if let Some(nested) = object.get_mut("dependencies") {
        changed |= strip_section(nested);
    }
    changed
}

fn strip_section(section: &mut Value) -> bool {
    let Some(entries) = section.as_object_mut() else {
        return false;
    };
    let mut changed = false;
    for entry in entries.values_mut() {
        changed |= strip_entry(entry);
    }
    changed
}

/// Remove `integrity` from npm lockfile records resolved from version control.
///
/// npm records an integrity hash for git dependencies that it cannot
/// reproduce from a rewritten tarball, so installation would fail. Returns
/// `None` when nothing changed.
pub fn strip_vcs_integrity(content: &str) -> HermitResult<Option<String>> {
    let mut lockfile: Value = serde_json::from_str(content)
        .map_err(|e| HermitError::unexpected_format(format!("npm lockfile is not valid JSON: {}", e)))?;

    let mut changed = false;
    for key in ["packages", "dependencies"] {
        if let Some(section) = lockfile.get_mut(key) {
            changed |= strip_section(section);
        }
    }

    if !changed {
        return Ok(None);
    }
    let mut json = serde_json::to_string_pretty(&lockfile)?;
    json.push('\n');
    Ok(Some(json))
}

async fn write_atomic(path: &Path, content: &str) -> HermitResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, content)
        .await
        .map_err(|e| HermitError::io(format!("writing {}", tmp.display()), e))?;
    if let Ok(metadata) = fs::metadata(path).await {
        let _ = fs::set_permissions(&tmp, metadata.permissions()).await;
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(HermitError::io(format!("replacing {}", path.display()), e));
    }
    Ok(())
}

/// Apply `edits` to files under `source_root`, returning the files that changed.
///
/// Running this twice with the same edits changes nothing the second time.
pub async fn apply_edits(
    source_root: &Path,
    edits: &[ProjectFileEdit],
) -> HermitResult<Vec<PathBuf>> {
    let root = RootedPath::new(source_root);

    let mut by_file: BTreeMap<&Path, Vec<&ProjectFileEdit>> = BTreeMap::new();
    for edit in edits {
        by_file.entry(edit.file_path.as_path()).or_default().push(edit);
    }

    let mut changed = Vec::new();
    for (file, file_edits) in by_file {
        let path = root.join_within_root(file)?.path();
        let original = fs::read_to_string(&path)
            .await
            .map_err(|e| HermitError::io(format!("reading {}", path.display()), e))?;

        let mut content = original.clone();
        for edit in file_edits {
            content = replace_idempotent(&content, &edit.locator_old_value, &edit.locator_new_value);
        }

        let is_npm_lockfile = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| NPM_LOCKFILES.contains(&n));
        if is_npm_lockfile {
            if let Some(stripped) = strip_vcs_integrity(&content)? {
                debug!("Stripped VCS integrity fields from {}", path.display());
                content = stripped;
            }
        }

        if content == original {
            debug!("{} already up to date", path.display());
            continue;
        }
        write_atomic(&path, &content).await?;
        info!("Updated {}", path.display());
        changed.push(path);
    }

    Ok(changed)
}
