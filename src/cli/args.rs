//! CLI argument definitions using clap derive

use crate::envfile::EnvFormat;
use crate::request::Mode;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hermit - prefetch dependencies for hermetic builds
///
/// Downloads and verifies every artifact a project's lockfiles name, records
/// them in an SBOM, and prepares the project to build without network access.
#[derive(Parser, Debug)]
#[command(name = "hermit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HERMIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local hermit.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Log output format (overrides general.log_format)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch and verify the dependencies named by a request
    FetchDeps(FetchDepsArgs),

    /// Generate an environment file for a fetched output directory
    GenerateEnv(GenerateEnvArgs),

    /// Rewrite project files to use the fetched artifacts
    InjectFiles(InjectFilesArgs),

    /// Merge several CycloneDX SBOMs into one
    MergeSboms(MergeSbomsArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Interpret the `general.log_format` config value
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Arguments for the fetch-deps command
#[derive(Parser, Debug)]
pub struct FetchDepsArgs {
    /// Package manager name, or a JSON request such as
    /// '{"type": "npm", "path": "frontend"}'
    pub request: String,

    /// Source directory containing the project
    #[arg(short, long, default_value = ".")]
    pub source: PathBuf,

    /// Directory to write fetched artifacts, the SBOM and the build config
    #[arg(short, long, default_value = "./hermit-output")]
    pub output: PathBuf,

    /// How missing checksums are treated
    #[arg(long, value_enum, default_value_t = Mode::Strict)]
    pub mode: Mode,

    /// Enable experimental (x- prefixed) package managers
    #[arg(long)]
    pub dev_package_managers: bool,
}

/// Arguments for the generate-env command
#[derive(Parser, Debug)]
pub struct GenerateEnvArgs {
    /// Output directory written by fetch-deps
    pub output_dir: PathBuf,

    /// Where the output directory will live during the build
    #[arg(long)]
    pub for_output_dir: Option<PathBuf>,

    /// Env file format (defaults to the --output suffix, then env)
    #[arg(short, long, value_enum)]
    pub format: Option<EnvFormat>,

    /// Write the env file here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the inject-files command
#[derive(Parser, Debug)]
pub struct InjectFilesArgs {
    /// Output directory written by fetch-deps
    pub output_dir: PathBuf,

    /// Where the output directory will live during the build
    #[arg(long)]
    pub for_output_dir: Option<PathBuf>,
}

/// Arguments for the merge-sboms command
#[derive(Parser, Debug)]
pub struct MergeSbomsArgs {
    /// SBOM files to merge
    #[arg(required = true, num_args = 1..)]
    pub sboms: Vec<PathBuf>,

    /// Write the merged SBOM here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a project-local hermit.toml with default values
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
