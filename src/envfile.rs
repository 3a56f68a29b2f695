//! Environment file generation

use crate::error::{HermitError, HermitResult};
use crate::output::BuildConfig;
use crate::remap;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Output format of `generate-env`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvFormat {
    /// `export NAME=value` lines
    Env,
    /// JSON array of `{name, value}`
    Json,
}

impl EnvFormat {
    /// Pick a format from the file extension of `path`
    pub fn based_on_suffix(path: &Path) -> HermitResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("env") | Some("sh") => Ok(Self::Env),
            Some("json") => Ok(Self::Json),
            other => {
                let reason = match other {
                    Some(suffix) => format!("Unsupported env file suffix: .{}", suffix),
                    None => format!("Cannot determine env file format of {}", path.display()),
                };
                Err(HermitError::UnsupportedFeature {
                    reason,
                    solution: Some(
                        "Use one of the supported suffixes (.env, .sh, .json) or pass --format explicitly."
                            .to_string(),
                    ),
                })
            }
        }
    }
}

impl fmt::Display for EnvFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Env => write!(f, "env"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Serialize)]
struct JsonVariable<'a> {
    name: &'a str,
    value: &'a str,
}

/// POSIX single-quote escaping: replace `'` with `'\''`.
fn shell_escape(s: &str) -> String {
    s.replace('\'', "'\\''")
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c))
}

fn shell_quote(value: &str) -> String {
    if needs_quoting(value) {
        format!("'{}'", shell_escape(value))
    } else {
        value.to_string()
    }
}

/// Render the variables of `config` resolved for `for_output_dir`
pub fn generate_envfile(
    config: &BuildConfig,
    format: EnvFormat,
    for_output_dir: &Path,
) -> HermitResult<String> {
    let resolved = remap::resolve_build_config(config, for_output_dir);
    let variables = &resolved.environment_variables;

    match format {
        EnvFormat::Env => Ok(variables
            .iter()
            .map(|var| format!("export {}={}\n", var.name, shell_quote(&var.value)))
            .collect()),
        EnvFormat::Json => {
            let entries: Vec<_> = variables
                .iter()
                .map(|var| JsonVariable {
                    name: &var.name,
                    value: &var.value,
                })
                .collect();
            let mut json = serde_json::to_string_pretty(&entries)?;
            json.push('\n');
            Ok(json)
        }
    }
}
