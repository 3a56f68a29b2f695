//! Package URL encoding
//!
//! `pkg:<type>/<namespace>/<name>@<version>?<qualifiers>#<subpath>`. The type
//! and version are lower-cased, an absent namespace is omitted, qualifiers are
//! sorted by key and empty values dropped, so equal inputs always render to
//! the same string.

use std::collections::BTreeMap;
use std::fmt;

/// A package URL under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUrl {
    package_type: String,
    namespace: Option<String>,
    name: String,
    version: Option<String>,
    qualifiers: BTreeMap<String, String>,
    subpath: Option<String>,
}

impl PackageUrl {
    pub fn new(package_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_type: package_type.into(),
            namespace: None,
            name: name.into(),
            version: None,
            qualifiers: BTreeMap::new(),
            subpath: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = (!version.is_empty()).then_some(version);
        self
    }

    pub fn with_qualifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifiers
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        let subpath = subpath.into();
        self.subpath = (!subpath.is_empty()).then_some(subpath);
        self
    }
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/", self.package_type.to_ascii_lowercase())?;
        if let Some(namespace) = &self.namespace {
            for segment in namespace.split('/').filter(|s| !s.is_empty()) {
                write!(f, "{}/", encode(segment, ""))?;
            }
        }
        f.write_str(&encode(&self.name, ""))?;
        if let Some(version) = &self.version {
            write!(f, "@{}", encode(&version.to_lowercase(), ":"))?;
        }

        let mut separator = '?';
        for (key, value) in self.qualifiers.iter().filter(|(_, v)| !v.is_empty()) {
            write!(f, "{}{}={}", separator, key, encode(value, ":/"))?;
            separator = '&';
        }

        if let Some(subpath) = &self.subpath {
            let segments: Vec<String> = subpath
                .split('/')
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .map(|s| encode(s, ""))
                .collect();
            write!(f, "#{}", segments.join("/"))?;
        }
        Ok(())
    }
}

/// Percent-encode everything outside the unreserved set and `safe`
fn encode(value: &str, safe: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') || safe.contains(c) {
            encoded.push(c);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_npm_package() {
        let purl = PackageUrl::new("npm", "core")
            .with_namespace("@babel")
            .with_version("7.24.0");
        assert_eq!(purl.to_string(), "pkg:npm/%40babel/core@7.24.0");
    }

    #[test]
    fn qualifiers_are_sorted_and_empty_ones_dropped() {
        let purl = PackageUrl::new("generic", "archive.tar.gz")
            .with_qualifier("download_url", "https://example.com/archive.tar.gz")
            .with_qualifier("checksum", "sha256:abc")
            .with_qualifier("vcs_url", "");
        assert_eq!(
            purl.to_string(),
            "pkg:generic/archive.tar.gz?checksum=sha256:abc&download_url=https://example.com/archive.tar.gz"
        );
    }

    #[test]
    fn version_and_type_are_lowercased() {
        let purl = PackageUrl::new("HuggingFace", "bert")
            .with_namespace("org")
            .with_version("ABCDEF");
        assert_eq!(purl.to_string(), "pkg:huggingface/org/bert@abcdef");
    }

    #[test]
    fn absent_namespace_is_omitted() {
        let purl = PackageUrl::new("npm", "left-pad").with_namespace("");
        assert_eq!(purl.to_string(), "pkg:npm/left-pad");
    }

    #[test]
    fn reserved_characters_are_encoded() {
        let purl = PackageUrl::new("generic", "a b@c").with_subpath("dir/../file name");
        assert_eq!(purl.to_string(), "pkg:generic/a%20b%40c#dir/file%20name");
    }
}
