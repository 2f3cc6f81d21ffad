//! The `config` CLI subcommand -- show and validate Valentine configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;

use valentine_analysis::{load_config, AnalysisResult, PlanConfig};

use crate::ExitCode;

// ---------------------------------------------------------------------------
// ConfigArgs
// ---------------------------------------------------------------------------

/// Manage Valentine configuration.
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,

    /// Project directory searched for `.valentine.yaml` (default: current directory).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Configuration file layered over the home and project files.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Config sub-subcommands.
#[derive(Debug, Clone, Copy, clap::Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Validate the configuration files, including regexes and limits.
    Validate,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `config` subcommand.
///
/// Returns an [`ExitCode`] indicating the outcome.
pub fn execute(args: ConfigArgs) -> Result<ExitCode, anyhow::Error> {
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to determine the current directory")?,
    };
    match args.action {
        ConfigAction::Show => execute_show(&root, args.config.as_deref()),
        ConfigAction::Validate => Ok(execute_validate(&root, args.config.as_deref())),
    }
}

/// Loads the effective configuration, serializes it to YAML and prints it to stdout.
fn execute_show(root: &Path, explicit: Option<&Path>) -> Result<ExitCode, anyhow::Error> {
    let cfg = load_config(Some(root), explicit).context("failed to load configuration")?;
    let yaml = cfg.to_yaml().context("failed to serialize configuration to YAML")?;
    print!("{yaml}");
    Ok(ExitCode::Pass)
}

/// Loads the configuration and reports whether it is valid.
fn execute_validate(root: &Path, explicit: Option<&Path>) -> ExitCode {
    match validate(root, explicit) {
        Ok(()) => {
            println!("Configuration is valid.");
            ExitCode::Pass
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            ExitCode::ConfigError
        }
    }
}

/// A configuration without targets is valid; targets come from the command line.
fn validate(root: &Path, explicit: Option<&Path>) -> AnalysisResult<()> {
    let mut cfg: PlanConfig = load_config(Some(root), explicit)?;
    if cfg.targets.is_empty() {
        cfg.targets.push(valentine_analysis::config::TargetConfig::new(root));
    }
    cfg.into_plan(root).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
