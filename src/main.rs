//! Hermit - prefetch dependencies for hermetic builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use hermit::cli::{Cli, Commands, LogFormat};
use hermit::config::ConfigManager;
use hermit::error::{HermitError, HermitResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e.friendly_message());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> HermitResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions(args) = cli.command {
        return hermit::cli::commands::completions(args);
    }

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd =
            std::env::current_dir().map_err(|e| HermitError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    let log_format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.general.log_format));
    init_logging(cli.verbose, log_format);

    if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
    } else if let Some(ref path) = local_config_path {
        debug!("Using local config: {}", path.display());
    }

    match cli.command {
        Commands::Completions(_) => unreachable!("Completions handled above"),
        Commands::FetchDeps(args) => hermit::cli::commands::fetch_deps(args, &config).await,
        Commands::GenerateEnv(args) => hermit::cli::commands::generate_env(args).await,
        Commands::InjectFiles(args) => hermit::cli::commands::inject_files(args).await,
        Commands::MergeSboms(args) => hermit::cli::commands::merge_sboms(args).await,
        Commands::Config(args) => {
            hermit::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` takes precedence when set
fn init_logging(verbose: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("hermit=warn"),
        1 => EnvFilter::new("hermit=info"),
        _ => EnvFilter::new("hermit=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
