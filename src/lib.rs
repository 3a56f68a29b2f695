//! Hermit - prefetch dependencies for hermetic builds
//!
//! Fetches and verifies the artifacts named by a project's lockfiles into a
//! content-addressed output directory, records them in a CycloneDX SBOM, and
//! produces the environment and project-file edits a network-isolated build
//! needs to consume them.

pub mod cache;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod driver;
pub mod envfile;
pub mod error;
pub mod fetch;
pub mod inject;
pub mod output;
pub mod remap;
pub mod request;
pub mod rooted_path;
pub mod sbom;
pub mod ui;

pub use error::{HermitError, HermitResult};
