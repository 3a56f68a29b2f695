//! Driver output and the build config written next to the prefetched files

use crate::error::{HermitError, HermitResult};
use crate::sbom::Component;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Name of the build config inside the output directory
pub const BUILD_CONFIG_FILE: &str = ".build-config.json";

/// Name of the SBOM inside the output directory
pub const SBOM_FILE: &str = "bom.json";

/// How an environment variable value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvVarKind {
    /// A path; relative values are resolved against the output directory
    Path,
    /// Used verbatim
    Literal,
}

/// A variable the hermetic build must set
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    pub kind: EnvVarKind,
}

impl EnvironmentVariable {
    pub fn path(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: EnvVarKind::Path,
        }
    }

    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: EnvVarKind::Literal,
        }
    }

    pub fn is_path_like(&self) -> bool {
        self.kind == EnvVarKind::Path
    }
}

/// A textual replacement in a project file, relative to the source root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectFileEdit {
    pub file_path: PathBuf,
    pub locator_old_value: String,
    pub locator_new_value: String,
}

/// Everything a driver produces for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOutput {
    pub components: Vec<Component>,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub project_file_edits: Vec<ProjectFileEdit>,
}

impl RequestOutput {
    /// Append another output
    pub fn extend(&mut self, other: RequestOutput) {
        self.components.extend(other.components);
        self.environment_variables
            .extend(other.environment_variables);
        self.project_file_edits.extend(other.project_file_edits);
    }
}

/// Persisted between `fetch-deps` and the later `generate-env` / `inject-files` steps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Source directory the edits apply to
    pub source_root: PathBuf,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub project_file_edits: Vec<ProjectFileEdit>,
}

impl BuildConfig {
    /// Load `<output_dir>/.build-config.json`
    pub async fn load(output_dir: &Path) -> HermitResult<Self> {
        let path = output_dir.join(BUILD_CONFIG_FILE);
        let content = fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HermitError::InvalidInput(format!(
                    "{} not found; run fetch-deps with this output directory first",
                    path.display()
                ))
            } else {
                HermitError::io(format!("reading {}", path.display()), e)
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            HermitError::unexpected_format(format!("{} is malformed: {}", path.display(), e))
        })
    }

    /// Write `<output_dir>/.build-config.json`
    pub async fn save(&self, output_dir: &Path) -> HermitResult<()> {
        let path = output_dir.join(BUILD_CONFIG_FILE);
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(&path, json)
            .await
            .map_err(|e| HermitError::io(format!("writing {}", path.display()), e))
    }
}
