//! SBOM assembly and merging
//!
//! Drivers emit [`Component`]s; [`assemble`] turns the surviving ones into a
//! byte-stable CycloneDX document. [`merge_sboms`] combines documents produced
//! by separate runs.

pub mod merge;
pub mod model;
pub mod properties;
pub mod purl;

pub use merge::{merge_components, merge_sboms};
pub use model::{Component, ExternalReference, Property, Sbom};
pub use purl::PackageUrl;

use crate::error::{HermitError, HermitResult};
use std::path::Path;
use tokio::fs;

/// Build the SBOM for a run. Duplicate purls across requests collapse.
pub fn assemble(components: Vec<Component>) -> HermitResult<Sbom> {
    for component in &components {
        properties::validate(component)?;
    }
    Ok(Sbom::new(merge_components(components)?))
}

/// Read a CycloneDX JSON document
pub async fn read_sbom(path: &Path) -> HermitResult<Sbom> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| HermitError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content).map_err(|e| HermitError::UnexpectedFormat {
        reason: format!("{} is not a valid SBOM: {}", path.display(), e),
        solution: Some("Pass CycloneDX JSON documents produced by fetch-deps.".to_string()),
    })
}

/// Write a document as pretty JSON
pub async fn write_sbom(path: &Path, sbom: &Sbom) -> HermitResult<()> {
    fs::write(path, sbom.to_json()?)
        .await
        .map_err(|e| HermitError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn assemble_collapses_duplicates() {
        let component = Component::new("a", Some("1.0.0"), "pkg:npm/a@1.0.0")
            .with_property(properties::FOUND_BY, properties::FOUND_BY_VALUE);
        let sbom = assemble(vec![component.clone(), component]).unwrap();
        assert_eq!(sbom.components.len(), 1);
    }

    #[tokio::test]
    async fn write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bom.json");
        let sbom = assemble(vec![Component::new("a", None, "pkg:generic/a")]).unwrap();

        write_sbom(&path, &sbom).await.unwrap();
        assert_eq!(read_sbom(&path).await.unwrap(), sbom);
    }

    #[tokio::test]
    async fn invalid_document_is_unexpected_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bom.json");
        std::fs::write(&path, "{\"components\": 3}").unwrap();

        let err = read_sbom(&path).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnexpectedFormat);
    }
}
