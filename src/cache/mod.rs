//! Content-addressed cache for prefetched artifacts
//!
//! Bytes live once in a physical store keyed by their SHA-256 digest. Each
//! ecosystem sees them through a logical layout: a tree of hard links (or
//! relative symlinks where hard links are unavailable) pointing back into the
//! store, so identical content is never duplicated.
//!
//! # Layout
//!
//! | Path | Content |
//! |------|---------|
//! | `deps/.store/sha256/<hex>` | Verified blobs, immutable |
//! | `deps/.store/tmp/` | Downloads in progress, never referenced |
//! | `deps/<ecosystem>/...` | Logical placements (see [`Layout`]) |
//! | `deps/huggingface/hub/...` | Blob, snapshot and ref triad (see [`HubCache`]) |
//!
//! # Write Discipline
//!
//! Content is written to a private temporary file, verified, and only then
//! linked under its final content-addressed name. A digest that is already
//! present is never rewritten; concurrent writers of the same digest race on
//! an atomic link and the loser discards its temporary file.

pub mod hub;
pub mod layout;
pub mod store;

pub use hub::{HubCache, HubFile, HubRepo, RepoKind};
pub use layout::{place, Layout};
pub use store::ContentStore;

use std::path::{Component, Path, PathBuf};

/// Directory holding every prefetched artifact, relative to the output root
pub const DEPS_DIR: &str = "deps";

/// Express `target` relative to the directory `from_dir`.
///
/// Both paths must share a prefix; the result walks up with `..` from
/// `from_dir` to the common ancestor and then down to `target`.
pub fn relative_path(from_dir: &Path, target: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    relative
}
