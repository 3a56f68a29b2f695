//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{HermitError, HermitResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> HermitResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => {
            let cwd =
                std::env::current_dir().map_err(|e| HermitError::io("getting current directory", e))?;
            init_local_config(&cwd, force).await?
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> HermitResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

/// Write a hermit.toml holding the defaults into `dir`
async fn init_local_config(dir: &Path, force: bool) -> HermitResult<()> {
    let ctx = UiContext::detect();
    let path = dir.join(LOCAL_CONFIG_NAME);

    if path.exists() && !force {
        ui::step_warn(
            &ctx,
            &format!(
                "Config already exists at {} (use --force to overwrite)",
                path.display()
            ),
        );
        return Ok(());
    }

    let content = toml::to_string_pretty(&Config::default())?;
    fs::write(&path, content)
        .await
        .map_err(|e| HermitError::io(format!("writing {}", path.display()), e))?;

    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_writes_parseable_defaults() {
        let temp = TempDir::new().unwrap();
        init_local_config(temp.path(), false).await.unwrap();

        let manager = ConfigManager::with_path(temp.path().join("missing.toml"));
        let loaded = manager
            .load_from_file(&temp.path().join(LOCAL_CONFIG_NAME))
            .await
            .unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[tokio::test]
    async fn init_keeps_existing_file_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCAL_CONFIG_NAME);
        std::fs::write(&path, "[fetch]\nconcurrency_limit = 2\n").unwrap();

        init_local_config(temp.path(), false).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("concurrency_limit = 2"));

        init_local_config(temp.path(), true).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("concurrency_limit = 5"));
    }
}
