//! Request model
//!
//! The command line accepts several input shapes: a bare ecosystem token
//! (`npm`), a single descriptor object (`{"type": "npm", "path": "web"}`), an
//! array of descriptors, or `{"packages": [...], "flags": [...]}`. Input is first
//! parsed into [`RawRequest`] and then normalized once into an ordered list of
//! [`PackageRequest`]s.

use crate::error::{HermitError, HermitResult};
use crate::rooted_path::RootedPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{error, warn};

/// Ecosystem identifiers with this prefix are experimental
pub const EXPERIMENTAL_PREFIX: &str = "x-";

/// How missing integrity data is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Missing checksums abort the run
    #[default]
    Strict,
    /// Missing checksums are reported as warnings
    Permissive,
}

impl Mode {
    /// Log `message` as an error in strict mode, as a warning otherwise
    pub fn error_or_warn(&self, message: &str) {
        match self {
            Mode::Strict => error!("[mode:STRICT] {}", message),
            Mode::Permissive => warn!("{}", message),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Strict => f.write_str("strict"),
            Mode::Permissive => f.write_str("permissive"),
        }
    }
}

/// Feature flags accepted in the request or on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// Enables experimental (`x-` prefixed) package managers
    DevPackageManagers,
}

impl FromStr for Flag {
    type Err = HermitError;

    fn from_str(s: &str) -> HermitResult<Self> {
        match s {
            "dev-package-managers" => Ok(Flag::DevPackageManagers),
            other => Err(HermitError::InvalidInput(format!(
                "Unknown flag: {} (supported: dev-package-managers)",
                other
            ))),
        }
    }
}

/// One package descriptor before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawPackage {
    pub ecosystem_type: String,
    pub path: Option<String>,
    pub options: BTreeMap<String, Value>,
}

/// The accepted input shapes
#[derive(Debug, Clone, PartialEq)]
pub enum RawRequest {
    Token(String),
    Single(RawPackage),
    Many(Vec<RawPackage>),
    Full {
        packages: Vec<RawPackage>,
        flags: Vec<String>,
    },
}

/// A normalized request for one (path, ecosystem) pair
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRequest {
    pub root_path: RootedPath,
    pub ecosystem_type: String,
    pub options: BTreeMap<String, Value>,
    pub flags: BTreeSet<Flag>,
}

impl PackageRequest {
    /// Read a string option
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Read a boolean option
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    /// Whether the ecosystem is experimental
    pub fn is_experimental(&self) -> bool {
        self.ecosystem_type.starts_with(EXPERIMENTAL_PREFIX)
    }
}

/// The normalized request list and global flags
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub packages: Vec<PackageRequest>,
    pub flags: BTreeSet<Flag>,
}

impl RawRequest {
    /// Parse command-line input. JSON when it looks like JSON, a bare token otherwise.
    pub fn parse(input: &str) -> HermitResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(HermitError::Usage("Empty request".to_string()));
        }

        if trimmed.starts_with(['{', '[', '"']) {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| HermitError::Usage(format!("Request is not valid JSON: {}", e)))?;
            return Self::from_value(value);
        }

        if !is_token(trimmed) {
            return Err(HermitError::Usage(format!(
                "Request must be a package manager name or a JSON document, got: {}",
                trimmed
            )));
        }
        Ok(RawRequest::Token(trimmed.to_string()))
    }

    /// Interpret an already parsed JSON document
    pub fn from_value(value: Value) -> HermitResult<Self> {
        match value {
            Value::String(token) => Ok(RawRequest::Token(token)),
            Value::Array(items) => Ok(RawRequest::Many(
                items
                    .into_iter()
                    .map(parse_package)
                    .collect::<HermitResult<_>>()?,
            )),
            Value::Object(mut map) if map.contains_key("packages") => {
                if let Some(key) = map.keys().find(|k| *k != "packages" && *k != "flags") {
                    return Err(HermitError::Usage(format!(
                        "Unexpected key in request: {}",
                        key
                    )));
                }
                let packages = match map.remove("packages") {
                    Some(Value::Array(items)) => items
                        .into_iter()
                        .map(parse_package)
                        .collect::<HermitResult<_>>()?,
                    _ => {
                        return Err(HermitError::Usage(
                            "'packages' must be an array of package descriptors".to_string(),
                        ))
                    }
                };
                let flags = match map.remove("flags") {
                    None => Vec::new(),
                    Some(Value::Array(items)) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(flag) => Ok(flag),
                            other => Err(HermitError::Usage(format!(
                                "Flags must be strings, got: {}",
                                other
                            ))),
                        })
                        .collect::<HermitResult<_>>()?,
                    Some(_) => {
                        return Err(HermitError::Usage("'flags' must be an array".to_string()))
                    }
                };
                Ok(RawRequest::Full { packages, flags })
            }
            Value::Object(map) if map.contains_key("type") => {
                Ok(RawRequest::Single(parse_package(Value::Object(map))?))
            }
            other => Err(HermitError::Usage(format!(
                "Unrecognized request shape: {}",
                other
            ))),
        }
    }

    /// Normalize into package requests rooted at `source`.
    ///
    /// `extra_flags` come from the command line and are merged with the
    /// flags carried by the input.
    pub fn normalize(self, source: &RootedPath, extra_flags: &[Flag]) -> HermitResult<Request> {
        let (packages, raw_flags) = match self {
            RawRequest::Token(token) => (
                vec![RawPackage {
                    ecosystem_type: token,
                    path: None,
                    options: BTreeMap::new(),
                }],
                Vec::new(),
            ),
            RawRequest::Single(package) => (vec![package], Vec::new()),
            RawRequest::Many(packages) => (packages, Vec::new()),
            RawRequest::Full { packages, flags } => (packages, flags),
        };

        let mut flags: BTreeSet<Flag> = extra_flags.iter().copied().collect();
        for flag in raw_flags {
            flags.insert(flag.parse()?);
        }

        if packages.is_empty() {
            return Err(HermitError::InvalidInput(
                "At least one package must be requested".to_string(),
            ));
        }

        let mut seen: HashSet<(PathBuf, String)> = HashSet::new();
        let mut normalized = Vec::with_capacity(packages.len());

        for package in packages {
            if !is_token(&package.ecosystem_type) {
                return Err(HermitError::InvalidInput(format!(
                    "Invalid package manager name: {:?}",
                    package.ecosystem_type
                )));
            }

            let raw_path = package.path.as_deref().unwrap_or(".");
            if PathBuf::from(raw_path).is_absolute() {
                return Err(HermitError::InvalidInput(format!(
                    "Package path must be relative to the source directory: {}",
                    raw_path
                )));
            }
            let root_path = source.join_within_root(raw_path)?;
            if !root_path.path().is_dir() {
                return Err(HermitError::InvalidInput(format!(
                    "Package path does not exist or is not a directory: {}",
                    root_path.path().display()
                )));
            }

            let key = (
                root_path.subpath().to_path_buf(),
                package.ecosystem_type.clone(),
            );
            if !seen.insert(key) {
                return Err(HermitError::InvalidInput(format!(
                    "Duplicate request for {} at path {}",
                    package.ecosystem_type,
                    display_subpath(&root_path)
                )));
            }

            if package.ecosystem_type.starts_with(EXPERIMENTAL_PREFIX)
                && !flags.contains(&Flag::DevPackageManagers)
            {
                return Err(HermitError::UnsupportedFeature {
                    reason: format!(
                        "Package manager '{}' is experimental",
                        package.ecosystem_type
                    ),
                    solution: Some(
                        "Pass --dev-package-managers (or the 'dev-package-managers' flag) to enable it."
                            .to_string(),
                    ),
                });
            }

            normalized.push(PackageRequest {
                root_path,
                ecosystem_type: package.ecosystem_type,
                options: package.options,
                flags: BTreeSet::new(),
            });
        }

        for package in &mut normalized {
            package.flags = flags.clone();
        }

        Ok(Request {
            packages: normalized,
            flags,
        })
    }
}

fn parse_package(value: Value) -> HermitResult<RawPackage> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(HermitError::InvalidInput(format!(
                "Package descriptor must be an object, got: {}",
                other
            )))
        }
    };

    let ecosystem_type = match map.remove("type") {
        Some(Value::String(t)) => t,
        Some(other) => {
            return Err(HermitError::InvalidInput(format!(
                "Package 'type' must be a string, got: {}",
                other
            )))
        }
        None => {
            return Err(HermitError::InvalidInput(
                "Package descriptor is missing 'type'".to_string(),
            ))
        }
    };

    let path = match map.remove("path") {
        None => None,
        Some(Value::String(p)) => Some(p),
        Some(other) => {
            return Err(HermitError::InvalidInput(format!(
                "Package 'path' must be a string, got: {}",
                other
            )))
        }
    };

    Ok(RawPackage {
        ecosystem_type,
        path,
        options: map.into_iter().collect(),
    })
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn display_subpath(path: &RootedPath) -> String {
    if path.subpath().as_os_str().is_empty() {
        ".".to_string()
    } else {
        path.subpath().display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn source() -> (TempDir, RootedPath) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("web")).unwrap();
        std::fs::create_dir_all(temp.path().join("models")).unwrap();
        let root = RootedPath::new(temp.path());
        (temp, root)
    }

    #[test]
    fn bare_token() {
        let (_temp, root) = source();
        let request = RawRequest::parse("npm").unwrap().normalize(&root, &[]).unwrap();
        assert_eq!(request.packages.len(), 1);
        assert_eq!(request.packages[0].ecosystem_type, "npm");
        assert_eq!(request.packages[0].root_path.subpath(), std::path::Path::new(""));
    }

    #[test]
    fn single_object_with_options() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(r#"{"type": "npm", "path": "web", "lockfile": "x.json"}"#)
            .unwrap();
        let request = raw.normalize(&root, &[]).unwrap();
        let package = &request.packages[0];
        assert_eq!(package.root_path.subpath(), std::path::Path::new("web"));
        assert_eq!(package.option_str("lockfile"), Some("x.json"));
    }

    #[test]
    fn array_keeps_order() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(r#"[{"type": "npm", "path": "web"}, {"type": "generic"}]"#)
            .unwrap();
        let request = raw.normalize(&root, &[]).unwrap();
        let types: Vec<_> = request
            .packages
            .iter()
            .map(|p| p.ecosystem_type.as_str())
            .collect();
        assert_eq!(types, ["npm", "generic"]);
    }

    #[test]
    fn full_shape_with_flags() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(
            r#"{"packages": [{"type": "x-huggingface", "path": "models"}], "flags": ["dev-package-managers"]}"#,
        )
        .unwrap();
        let request = raw.normalize(&root, &[]).unwrap();
        assert!(request.flags.contains(&Flag::DevPackageManagers));
        assert!(request.packages[0].flags.contains(&Flag::DevPackageManagers));
    }

    #[test]
    fn unknown_shape_is_usage_error() {
        let err = RawRequest::parse(r#"{"kind": "npm"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageError);
        let err = RawRequest::parse("42").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageError);
        let err = RawRequest::parse("npm yarn").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageError);
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(r#"[{"type": "npm"}, {"type": "npm", "path": "./"}]"#).unwrap();
        let err = raw.normalize(&root, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn path_outside_root_is_rejected() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(r#"{"type": "npm", "path": "../elsewhere"}"#).unwrap();
        let err = raw.normalize(&root, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathOutsideRoot);
    }

    #[test]
    fn experimental_requires_flag() {
        let (_temp, root) = source();
        let err = RawRequest::parse("x-huggingface")
            .unwrap()
            .normalize(&root, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);

        let request = RawRequest::parse("x-huggingface")
            .unwrap()
            .normalize(&root, &[Flag::DevPackageManagers])
            .unwrap();
        assert!(request.packages[0].is_experimental());
    }

    #[test]
    fn unknown_flag_is_invalid_input() {
        let (_temp, root) = source();
        let raw = RawRequest::parse(r#"{"packages": [{"type": "npm"}], "flags": ["turbo"]}"#)
            .unwrap();
        assert_eq!(
            raw.normalize(&root, &[]).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn mode_display() {
        assert_eq!(Mode::Strict.to_string(), "strict");
        assert_eq!(Mode::default(), Mode::Strict);
    }
}
