//! Configuration schema for Hermit
//!
//! Configuration is stored at `~/.config/hermit/config.toml`, optionally
//! overlaid by a project-local `hermit.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Network and concurrency settings for fetching
    pub fetch: FetchConfig,

    /// npm driver settings
    pub npm: NpmConfig,

    /// Hugging Face driver settings
    pub huggingface: HuggingFaceConfig,

    /// Extra variables added to every build config
    pub environment: EnvironmentConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Fetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Maximum number of requests and downloads in flight
    pub concurrency_limit: usize,

    /// Timeout for a single network request
    pub requests_timeout_secs: u64,

    /// Attempts per download before giving up
    pub download_max_tries: u32,

    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            requests_timeout_secs: 300,
            download_max_tries: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl FetchConfig {
    pub fn requests_timeout(&self) -> Duration {
        Duration::from_secs(self.requests_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// npm settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NpmConfig {
    /// Registry whose tarballs are stored under their flat name
    pub registry: String,
}

impl Default for NpmConfig {
    fn default() -> Self {
        Self {
            registry: "https://registry.npmjs.org".to_string(),
        }
    }
}

/// Hugging Face settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HuggingFaceConfig {
    /// Hub endpoint files are resolved against
    pub endpoint: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://huggingface.co".to_string(),
        }
    }
}

/// Build environment settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Literal variables emitted alongside the drivers' variables
    pub default_variables: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[fetch]"));
        assert!(toml.contains("concurrency_limit = 5"));
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [fetch]
            concurrency_limit = 2

            [huggingface]
            endpoint = "https://hf.example.com"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.fetch.concurrency_limit, 2);
        assert_eq!(config.fetch.requests_timeout_secs, 300);
        assert_eq!(config.huggingface.endpoint, "https://hf.example.com");
        assert_eq!(config.npm.registry, "https://registry.npmjs.org");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = r#"
            [fetch]
            concurency_limit = 2
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn default_variables_parse() {
        let toml = r#"
            [environment.default_variables]
            PIP_NO_INDEX = "1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.environment.default_variables.get("PIP_NO_INDEX"),
            Some(&"1".to_string())
        );
    }
}
