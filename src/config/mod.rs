//! Configuration management for Hermit
//!
//! Layers, lowest precedence first: built-in defaults, the global config file,
//! a project-local `hermit.toml`, `HERMIT_*` environment variables, and finally
//! command-line flags (applied by the commands themselves).

pub mod schema;

pub use schema::Config;

use crate::error::{HermitError, HermitResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File name of the project-local config
pub const LOCAL_CONFIG_NAME: &str = "hermit.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hermit")
            .join("config.toml")
    }

    /// Walk up from `start` looking for a project-local config
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> HermitResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> HermitResult<Config> {
        let value = read_toml(path).await?;
        value.try_into().map_err(|e: toml::de::Error| HermitError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load the global config, overlay the local one, then apply environment overrides
    pub async fn load_merged(&self, local: Option<&Path>) -> HermitResult<Config> {
        let mut merged = if self.config_path.exists() {
            read_toml(&self.config_path).await?
        } else {
            toml::Value::Table(toml::map::Map::new())
        };

        if let Some(local) = local {
            debug!("Overlaying local config {}", local.display());
            let overlay = read_toml(local).await?;
            merge_toml(&mut merged, overlay);
        }

        let mut config: Config =
            merged
                .try_into()
                .map_err(|e: toml::de::Error| HermitError::ConfigInvalid {
                    path: local.unwrap_or(&self.config_path).to_path_buf(),
                    reason: e.to_string(),
                })?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> HermitResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            HermitError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> HermitResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                HermitError::io(format!("creating config directory {}", parent.display()), e)
            })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Apply `HERMIT_*` overrides. `lookup` returns the value of a variable.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> HermitResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HERMIT_LOG_FORMAT") {
            self.general.log_format = value;
        }
        if let Some(value) = lookup("HERMIT_CONCURRENCY_LIMIT") {
            self.fetch.concurrency_limit = parse_env("HERMIT_CONCURRENCY_LIMIT", &value)?;
        }
        if let Some(value) = lookup("HERMIT_REQUESTS_TIMEOUT") {
            self.fetch.requests_timeout_secs = parse_env("HERMIT_REQUESTS_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("HERMIT_DOWNLOAD_MAX_TRIES") {
            self.fetch.download_max_tries = parse_env("HERMIT_DOWNLOAD_MAX_TRIES", &value)?;
        }
        if let Some(value) = lookup("HERMIT_NPM_REGISTRY") {
            self.npm.registry = value;
        }
        if let Some(value) = lookup("HERMIT_HF_ENDPOINT") {
            self.huggingface.endpoint = value;
        }

        if self.fetch.concurrency_limit == 0 {
            return Err(HermitError::InvalidInput(
                "fetch.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.fetch.download_max_tries == 0 {
            return Err(HermitError::InvalidInput(
                "fetch.download_max_tries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> HermitResult<T> {
    value.trim().parse().map_err(|_| {
        HermitError::InvalidInput(format!("Invalid value for {}: {}", name, value))
    })
}

async fn read_toml(path: &Path) -> HermitResult<toml::Value> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| HermitError::io(format!("reading config from {}", path.display()), e))?;

    content
        .parse()
        .map_err(|e: toml::de::Error| HermitError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, other values replace.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
