//! Component property names accepted in SBOMs

use super::model::{Component, Property};
use crate::error::{HermitError, HermitResult};
use std::collections::BTreeSet;

pub const FOUND_BY: &str = "hermit:found_by";
pub const MISSING_HASH_IN_FILE: &str = "hermit:missing_hash:in_file";
pub const BUNDLER_BINARY: &str = "hermit:bundler:package:binary";
pub const PIP_BINARY: &str = "hermit:pip:package:binary";
pub const PIP_BUILD_DEPENDENCY: &str = "hermit:pip:package:build-dependency";
pub const RPM_SUMMARY: &str = "hermit:rpm_summary";
pub const NPM_BUNDLED: &str = "cdx:npm:package:bundled";
pub const NPM_DEVELOPMENT: &str = "cdx:npm:package:development";

/// Value of [`FOUND_BY`] on components this tool produces
pub const FOUND_BY_VALUE: &str = "hermit";

/// Every property name a component may carry
pub const ALLOWED: &[&str] = &[
    FOUND_BY,
    MISSING_HASH_IN_FILE,
    BUNDLER_BINARY,
    PIP_BINARY,
    PIP_BUILD_DEPENDENCY,
    RPM_SUMMARY,
    NPM_BUNDLED,
    NPM_DEVELOPMENT,
];

pub fn is_allowed(name: &str) -> bool {
    ALLOWED.contains(&name)
}

/// Reject components carrying unknown property names
pub fn validate(component: &Component) -> HermitResult<()> {
    match component.properties.iter().find(|p| !is_allowed(&p.name)) {
        None => Ok(()),
        Some(property) => Err(HermitError::UnexpectedFormat {
            reason: format!(
                "Component {} has unsupported property '{}'",
                component.purl, property.name
            ),
            solution: Some(format!(
                "Only these properties are accepted: {}",
                ALLOWED.join(", ")
            )),
        }),
    }
}

/// The meaning of one component's properties.
///
/// Duplicates of a component combine per property: a package is
/// development-only, bundled or a build dependency only if every duplicate
/// says so, a binary if any does, and missing-hash locations accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    pub found_by: Option<String>,
    pub missing_hash_in_file: BTreeSet<String>,
    pub bundler_binary: bool,
    pub pip_binary: bool,
    pub pip_build_dependency: bool,
    pub npm_bundled: bool,
    pub npm_development: bool,
    pub rpm_summary: Option<String>,
}

/// Two duplicates disagree on a single-valued property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyConflict {
    pub name: &'static str,
    pub existing: String,
    pub incoming: String,
}

impl PropertySet {
    /// Read the properties of a component that passed [`validate`]
    pub fn from_properties(properties: &[Property]) -> Self {
        let mut set = Self::default();
        for property in properties {
            let value = property.value.clone();
            match property.name.as_str() {
                FOUND_BY => {
                    set.found_by.get_or_insert(value);
                }
                RPM_SUMMARY => {
                    set.rpm_summary.get_or_insert(value);
                }
                MISSING_HASH_IN_FILE => {
                    set.missing_hash_in_file.insert(value);
                }
                BUNDLER_BINARY => set.bundler_binary = true,
                PIP_BINARY => set.pip_binary = true,
                PIP_BUILD_DEPENDENCY => set.pip_build_dependency = true,
                NPM_BUNDLED => set.npm_bundled = true,
                NPM_DEVELOPMENT => set.npm_development = true,
                _ => {}
            }
        }
        set
    }

    /// Combine the properties of two duplicates of one component
    pub fn merge(self, other: Self) -> Result<Self, PropertyConflict> {
        let found_by = merge_single(FOUND_BY, self.found_by, other.found_by)?;
        let rpm_summary = merge_single(RPM_SUMMARY, self.rpm_summary, other.rpm_summary)?;
        let mut missing_hash_in_file = self.missing_hash_in_file;
        missing_hash_in_file.extend(other.missing_hash_in_file);
        Ok(Self {
            found_by,
            missing_hash_in_file,
            bundler_binary: self.bundler_binary || other.bundler_binary,
            pip_binary: self.pip_binary || other.pip_binary,
            pip_build_dependency: self.pip_build_dependency && other.pip_build_dependency,
            npm_bundled: self.npm_bundled && other.npm_bundled,
            npm_development: self.npm_development && other.npm_development,
            rpm_summary,
        })
    }

    /// Properties sorted by name and value; flags that hold carry "true"
    pub fn to_properties(&self) -> Vec<Property> {
        let flags = [
            (BUNDLER_BINARY, self.bundler_binary),
            (PIP_BINARY, self.pip_binary),
            (PIP_BUILD_DEPENDENCY, self.pip_build_dependency),
            (NPM_BUNDLED, self.npm_bundled),
            (NPM_DEVELOPMENT, self.npm_development),
        ];
        let mut properties: Vec<Property> = flags
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(name, _)| property(name, "true"))
            .collect();
        properties.extend(self.found_by.iter().map(|v| property(FOUND_BY, v)));
        properties.extend(self.rpm_summary.iter().map(|v| property(RPM_SUMMARY, v)));
        properties.extend(
            self.missing_hash_in_file
                .iter()
                .map(|v| property(MISSING_HASH_IN_FILE, v)),
        );
        properties.sort();
        properties
    }
}

fn merge_single(
    name: &'static str,
    existing: Option<String>,
    incoming: Option<String>,
) -> Result<Option<String>, PropertyConflict> {
    match (existing, incoming) {
        (Some(existing), Some(incoming)) if existing != incoming => Err(PropertyConflict {
            name,
            existing,
            incoming,
        }),
        (existing, incoming) => Ok(existing.or(incoming)),
    }
}

fn property(name: &str, value: &str) -> Property {
    Property {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(properties: &[(&str, &str)]) -> PropertySet {
        let properties: Vec<_> = properties.iter().map(|(n, v)| property(n, v)).collect();
        PropertySet::from_properties(&properties)
    }

    #[test]
    fn known_properties() {
        assert!(is_allowed(FOUND_BY));
        assert!(is_allowed("cdx:npm:package:bundled"));
        assert!(!is_allowed("acme:secret"));
    }

    #[test]
    fn unknown_property_is_unexpected_format() {
        let component = Component::new("a", Some("1"), "pkg:npm/a@1").with_property("acme:x", "y");
        let err = validate(&component).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnexpectedFormat);
        assert!(err.to_string().contains("acme:x"));
    }

    #[test]
    fn development_only_if_every_duplicate_is() {
        let runtime = set(&[(FOUND_BY, FOUND_BY_VALUE)]);
        let dev = set(&[(FOUND_BY, FOUND_BY_VALUE), (NPM_DEVELOPMENT, "true")]);

        let merged = runtime.merge(dev.clone()).unwrap();
        assert!(!merged.npm_development);
        assert!(dev.clone().merge(dev).unwrap().npm_development);
    }

    #[test]
    fn binary_if_any_duplicate_is() {
        let merged = set(&[(PIP_BINARY, "true")]).merge(set(&[])).unwrap();
        assert!(merged.pip_binary);
        assert!(!merged.pip_build_dependency);
    }

    #[test]
    fn missing_hash_locations_accumulate() {
        let merged = set(&[(MISSING_HASH_IN_FILE, "b/package-lock.json")])
            .merge(set(&[(MISSING_HASH_IN_FILE, "a/package-lock.json")]))
            .unwrap();
        let values: Vec<_> = merged
            .to_properties()
            .into_iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, ["a/package-lock.json", "b/package-lock.json"]);
    }

    #[test]
    fn single_valued_fills_gaps_but_rejects_disagreement() {
        let merged = set(&[]).merge(set(&[(RPM_SUMMARY, "zlib")])).unwrap();
        assert_eq!(merged.rpm_summary.as_deref(), Some("zlib"));

        let conflict = set(&[(RPM_SUMMARY, "one")])
            .merge(set(&[(RPM_SUMMARY, "two")]))
            .unwrap_err();
        assert_eq!(conflict.name, RPM_SUMMARY);
        assert_eq!(conflict.incoming, "two");
    }

    #[test]
    fn flags_render_as_true() {
        let properties = set(&[(NPM_BUNDLED, "yes"), (FOUND_BY, FOUND_BY_VALUE)]).to_properties();
        assert_eq!(
            properties,
            [property(NPM_BUNDLED, "true"), property(FOUND_BY, FOUND_BY_VALUE)]
        );
    }
}
