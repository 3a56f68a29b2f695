//! Merging components and whole SBOM documents

use super::model::{self, Component, Sbom, BOM_FORMAT};
use super::properties::{self, PropertySet};
use crate::error::{HermitError, HermitResult};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Merge two or more documents into one.
///
/// Every component must use only the whitelisted property names. Components
/// with the same purl collapse into one; their name, version and type must
/// agree and their properties combine as described on [`PropertySet`].
pub fn merge_sboms(documents: Vec<Sbom>) -> HermitResult<Sbom> {
    if documents.len() < 2 {
        return Err(HermitError::InvalidInput(format!(
            "At least two SBOMs are needed to merge, got {}",
            documents.len()
        )));
    }

    let mut tools = BTreeSet::new();
    let mut components = Vec::new();
    for document in documents {
        if document.bom_format != BOM_FORMAT {
            return Err(HermitError::unexpected_format(format!(
                "Unsupported SBOM format '{}', expected {}",
                document.bom_format, BOM_FORMAT
            )));
        }
        for component in &document.components {
            properties::validate(component)?;
        }
        tools.extend(document.metadata.tools);
        components.extend(document.components);
    }

    let mut merged = Sbom::new(merge_components(components)?);
    tools.extend(merged.metadata.tools.drain(..));
    merged.metadata.tools = tools.into_iter().collect();
    Ok(merged)
}

/// Collapse components with identical purls, in document order
pub fn merge_components(
    components: impl IntoIterator<Item = Component>,
) -> HermitResult<Vec<Component>> {
    let mut by_purl: BTreeMap<String, Component> = BTreeMap::new();
    for component in components {
        match by_purl.entry(component.purl.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(component);
            }
            Entry::Occupied(mut slot) => merge_component(slot.get_mut(), component)?,
        }
    }
    let mut merged: Vec<Component> = by_purl
        .into_values()
        .map(|mut component| {
            component.normalize();
            component
        })
        .collect();
    model::sort_components(&mut merged);
    Ok(merged)
}

fn merge_component(existing: &mut Component, incoming: Component) -> HermitResult<()> {
    let purl = existing.purl.clone();
    let conflict = |field: &str, a: &str, b: &str| HermitError::UnexpectedFormat {
        reason: format!("Conflicting {} for {}: '{}' vs '{}'", field, purl, a, b),
        solution: Some(
            "Components sharing a purl must describe the same package. \
             Check which document was generated from a different source."
                .to_string(),
        ),
    };

    if existing.name != incoming.name {
        return Err(conflict("name", &existing.name, &incoming.name));
    }
    if existing.version != incoming.version {
        return Err(conflict(
            "version",
            existing.version.as_deref().unwrap_or(""),
            incoming.version.as_deref().unwrap_or(""),
        ));
    }
    if existing.component_type != incoming.component_type {
        return Err(conflict(
            "type",
            &existing.component_type,
            &incoming.component_type,
        ));
    }

    let combined = PropertySet::from_properties(&existing.properties)
        .merge(PropertySet::from_properties(&incoming.properties))
        .map_err(|c| conflict(c.name, &c.existing, &c.incoming))?;
    existing.properties = combined.to_properties();
    existing
        .external_references
        .extend(incoming.external_references);
    existing.normalize();
    Ok(())
}
