//! Command-line interface for devflow.
//!
//! # Available Commands
//!
//! - `resolve` - Resolve the dependency graph and print it
//! - `build` - Build the images of all dependencies, then of the project
//! - `deploy` - Build and deploy all dependencies, then the project
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug output and stream dependency output as it happens
//! - `--quiet` - Suppress all output except errors
//! - `--no-progress` - Disable spinners
//! - `--config` - Path to the global settings file
//! - `--project` - Project directory or config file
//! - `--profile` - Profile of the root project config
//!
//! # Example
//!
//! ```bash
//! devflow resolve --flat
//! devflow build --tag dev --max-concurrent-builds 2
//! devflow deploy --skip-dependency monitoring
//! ```

mod build;
pub mod common;
mod deploy;
mod resolve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::interrupt::InterruptRegistry;
use common::CommandContext;

/// Runtime configuration derived from the global flags.
///
/// Kept separate from [`Cli`] so tests and embedders can control logging and
/// progress output without parsing arguments.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Default log filter when `RUST_LOG` is not set. `None` keeps logging off.
    pub log_level: Option<String>,

    /// Hide spinners.
    pub no_progress: bool,

    /// Global settings file instead of `~/.devflow/config.toml`.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the global tracing subscriber. `RUST_LOG` takes precedence over the
    /// level chosen by `--verbose`/`--quiet`.
    pub fn init_logging(&self) {
        let filter = match (std::env::var("RUST_LOG").is_ok(), &self.log_level) {
            (true, _) => EnvFilter::from_default_env(),
            (false, Some(level)) => EnvFilter::new(level),
            (false, None) => return,
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .try_init();
    }
}

#[derive(Parser)]
#[command(
    name = "devflow",
    about = "Developer workflow orchestrator - resolve dependencies, build images, deploy",
    version,
    long_about = "devflow resolves a tree of sub-project dependencies, builds their container images \
                  with a persistent rebuild cache and deploys them, dependencies first."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the global settings file
    #[arg(short, long, global = true, env = "DEVFLOW_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Project directory or config file (defaults to the closest devflow.yaml)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Profile of the project config to apply
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Disable progress spinners
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the dependency graph and print it
    Resolve(resolve::ResolveCommand),

    /// Build images of the dependencies and the project
    Build(build::BuildCommand),

    /// Build and deploy the dependencies and the project
    Deploy(deploy::DeployCommand),
}

impl Cli {
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.quiet {
            Some("error".to_string())
        } else if self.verbose {
            Some("debug".to_string())
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Run the command. Cleanups of interrupted operations go to `interrupts`.
    pub async fn execute_with_config(self, config: CliConfig, interrupts: InterruptRegistry) -> Result<()> {
        let ctx = CommandContext::load(self.project, self.profile, config.config_path, interrupts)
            .await?
            .with_verbose(self.verbose)
            .with_no_progress(config.no_progress);

        match self.command {
            Commands::Resolve(cmd) => cmd.execute(ctx).await,
            Commands::Build(cmd) => cmd.execute(ctx).await,
            Commands::Deploy(cmd) => cmd.execute(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let cli = Cli::parse_from(["devflow", "build"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("info"));

        let cli = Cli::parse_from(["devflow", "-v", "build"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("debug"));

        let cli = Cli::parse_from(["devflow", "deploy", "--quiet"]);
        assert_eq!(cli.build_config().log_level.as_deref(), Some("error"));
    }

    #[test]
    fn test_no_progress_flag() {
        assert!(!Cli::parse_from(["devflow", "resolve"]).build_config().no_progress);
        assert!(Cli::parse_from(["devflow", "--no-progress", "resolve"]).build_config().no_progress);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["devflow", "-v", "-q", "build"]).is_err());
    }

    #[test]
    fn test_flags_reach_subcommands() {
        let cli = Cli::try_parse_from([
            "devflow",
            "deploy",
            "--skip-build",
            "--tag",
            "dev",
            "--skip-dependency",
            "monitoring",
            "--max-concurrent-builds",
            "2",
            "--project",
            "/srv/app",
        ])
        .unwrap();
        assert_eq!(cli.project, Some(PathBuf::from("/srv/app")));
        assert!(matches!(cli.command, Commands::Deploy(_)));
    }
}
