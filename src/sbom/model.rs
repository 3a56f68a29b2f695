//! CycloneDX document model

use serde::{Deserialize, Serialize};

pub const BOM_FORMAT: &str = "CycloneDX";
pub const SPEC_VERSION: &str = "1.4";

/// A CycloneDX SBOM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sbom {
    pub bom_format: String,
    pub spec_version: String,
    pub version: u32,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tool {
    pub vendor: String,
    pub name: String,
}

impl Tool {
    /// This tool
    pub fn hermit() -> Self {
        Self {
            vendor: env!("CARGO_PKG_NAME").to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// One package in the SBOM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub purl: String,
    #[serde(rename = "type", default = "default_component_type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_references: Vec<ExternalReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
}

fn default_component_type() -> String {
    "library".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalReference {
    pub url: String,
    #[serde(rename = "type")]
    pub reference_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Component {
    pub fn new(name: impl Into<String>, version: Option<&str>, purl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.map(str::to_string),
            purl: purl.into(),
            component_type: default_component_type(),
            external_references: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(Property {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_distribution(mut self, url: impl Into<String>) -> Self {
        self.external_references.push(ExternalReference {
            url: url.into(),
            reference_type: "distribution".to_string(),
        });
        self
    }

    /// Ecosystem of the component, taken from its purl type
    pub fn ecosystem(&self) -> &str {
        let package_type = self
            .purl
            .strip_prefix("pkg:")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default();
        match package_type {
            "huggingface" => "x-huggingface",
            other => other,
        }
    }

    /// Document order: ecosystem, name, version, then purl
    fn sort_key(&self) -> (&str, &str, Option<&str>, &str) {
        (
            self.ecosystem(),
            &self.name,
            self.version.as_deref(),
            &self.purl,
        )
    }

    /// Sort and de-duplicate properties and references
    pub fn normalize(&mut self) {
        self.properties.sort();
        self.properties.dedup();
        self.external_references.sort();
        self.external_references.dedup();
    }
}

impl Sbom {
    /// Create a document holding `components` in document order
    pub fn new(mut components: Vec<Component>) -> Self {
        for component in &mut components {
            component.normalize();
        }
        sort_components(&mut components);
        Self {
            bom_format: BOM_FORMAT.to_string(),
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            metadata: Metadata {
                tools: vec![Tool::hermit()],
            },
            components,
        }
    }

    /// Pretty JSON with a trailing newline
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Order components by ecosystem, name and version
pub fn sort_components(components: &mut [Component]) {
    components.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_cyclonedx_field_names() {
        let sbom = Sbom::new(vec![Component::new(
            "left-pad",
            Some("1.3.0"),
            "pkg:npm/left-pad@1.3.0",
        )
        .with_distribution("https://registry.npmjs.org/left-pad/-/left-pad-1.3.0.tgz")
        .with_property("hermit:found_by", "hermit")]);

        let json: serde_json::Value = serde_json::from_str(&sbom.to_json().unwrap()).unwrap();
        assert_eq!(json["bomFormat"], "CycloneDX");
        assert_eq!(json["specVersion"], "1.4");
        assert_eq!(json["components"][0]["type"], "library");
        assert_eq!(
            json["components"][0]["externalReferences"][0]["type"],
            "distribution"
        );
        assert_eq!(json["metadata"]["tools"][0]["name"], "hermit");
    }

    #[test]
    fn output_is_byte_stable() {
        let a = Component::new("b", None, "pkg:generic/b");
        let b = Component::new("a", None, "pkg:generic/a")
            .with_property("hermit:found_by", "hermit")
            .with_property("hermit:found_by", "hermit");
        let first = Sbom::new(vec![a.clone(), b.clone()]).to_json().unwrap();
        let second = Sbom::new(vec![b, a]).to_json().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.matches("hermit:found_by").count(), 1);
    }

    #[test]
    fn components_are_ordered_by_ecosystem_then_name() {
        let sbom = Sbom::new(vec![
            Component::new(
                "zeta-model",
                Some("0123456789abcdef0123456789abcdef01234567"),
                "pkg:huggingface/org/zeta-model@0123456789abcdef0123456789abcdef01234567",
            ),
            Component::new("aaa", Some("1.0.0"), "pkg:npm/aaa@1.0.0"),
            Component::new("@babel/core", Some("7.0.0"), "pkg:npm/%40babel/core@7.0.0"),
            Component::new("zlib", None, "pkg:generic/zlib"),
        ]);

        let names: Vec<_> = sbom.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["zlib", "@babel/core", "aaa", "zeta-model"]);
        assert_eq!(sbom.components[3].ecosystem(), "x-huggingface");
    }

    #[test]
    fn purl_breaks_ties_between_equal_names() {
        let sbom = Sbom::new(vec![
            Component::new("file.bin", None, "pkg:generic/file.bin?download_url=https://b"),
            Component::new("file.bin", None, "pkg:generic/file.bin?download_url=https://a"),
        ]);
        assert!(sbom.components[0].purl.ends_with("https://a"));
    }

    #[test]
    fn missing_type_defaults_to_library() {
        let component: Component =
            serde_json::from_str(r#"{"name": "x", "purl": "pkg:generic/x"}"#).unwrap();
        assert_eq!(component.component_type, "library");
    }
}
