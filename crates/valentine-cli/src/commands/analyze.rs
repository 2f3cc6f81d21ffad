//! The `analyze` CLI subcommand -- runs the engine over files and directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use valentine_analysis::config::{OutputConfig, TargetConfig};
use valentine_analysis::{load_config, AnalysisPlan, AnalysisPlanRunner, PlanConfig};
use valentine_core::report::{ReportCategory, ReportFactory, ReportLevel};
use valentine_core::SelectionMode;
use valentine_report::terminal::TerminalReport;
use valentine_report::OutputFormat;

use crate::progress::ProgressBarReport;
use crate::ExitCode;

// ---------------------------------------------------------------------------
// AnalyzeArgs
// ---------------------------------------------------------------------------

/// Analyze files and directories.
#[derive(Debug, Default, clap::Args)]
pub struct AnalyzeArgs {
    /// Files or directories to analyze; replaces the configured targets.
    pub targets: Vec<PathBuf>,

    /// Root directory; relative targets and outputs are resolved against it.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Do not descend into subdirectories of the targets.
    #[arg(long)]
    pub no_recursive: bool,

    /// Only analyze paths matching this regex (repeatable).
    #[arg(long = "include", value_name = "REGEX")]
    pub include: Vec<String>,

    /// Skip paths matching this regex (repeatable).
    #[arg(long = "exclude", value_name = "REGEX")]
    pub exclude: Vec<String>,

    /// Number of worker threads.
    #[arg(long, short = 'j')]
    pub threads: Option<usize>,

    /// Maximum number of targets loaded at once.
    #[arg(long, conflicts_with = "max_loaded_size")]
    pub max_concurrent_tasks: Option<u32>,

    /// Maximum total size in bytes of the targets loaded at once.
    #[arg(long)]
    pub max_loaded_size: Option<u64>,

    /// Only report these uids (comma-separated).
    #[arg(long, value_delimiter = ',', conflicts_with = "skip")]
    pub only: Vec<String>,

    /// Never report these uids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Drop reports of this level (repeatable): info, warning, error, critical.
    #[arg(long = "exclude-level", value_name = "LEVEL")]
    pub exclude_levels: Vec<ReportLevel>,

    /// Drop reports of this category (repeatable).
    #[arg(long = "exclude-category", value_name = "CATEGORY")]
    pub exclude_categories: Vec<ReportCategory>,

    /// Skip the combined (cross-target) analysis.
    #[arg(long)]
    pub no_combined: bool,

    /// Output report as FORMAT:PATH (repeatable), e.g. `sarif:out.sarif`.
    #[arg(long, short, value_name = "FORMAT:PATH", value_parser = parse_output)]
    pub output: Vec<OutputConfig>,

    /// Configuration file layered over the home and project files.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// Enable verbose output.
    #[arg(long, short)]
    pub verbose: bool,

    /// Suppress all non-essential output.
    #[arg(long, short)]
    pub quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Parses `FORMAT:PATH`.
fn parse_output(value: &str) -> Result<OutputConfig, String> {
    let (format, path) = value
        .split_once(':')
        .ok_or_else(|| format!("expected FORMAT:PATH, got '{value}'"))?;
    if path.is_empty() {
        return Err(format!("missing output path in '{value}'"));
    }
    Ok(OutputConfig {
        format: format.parse::<OutputFormat>()?,
        path: PathBuf::from(path),
    })
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Applies the command-line flags on top of the loaded configuration.
fn apply_overrides(config: &mut PlanConfig, args: &AnalyzeArgs) {
    if !args.targets.is_empty() {
        config.targets = args.targets.iter().map(TargetConfig::new).collect();
    }
    for target in &mut config.targets {
        if args.no_recursive {
            target.recursive = false;
        }
        target.include_regex.extend(args.include.iter().cloned());
        target.exclude_regex.extend(args.exclude.iter().cloned());
    }

    let analysis = &mut config.analysis;
    if args.threads.is_some() {
        analysis.thread_count = args.threads;
    }
    if args.max_concurrent_tasks.is_some() || args.max_loaded_size.is_some() {
        analysis.max_concurrent_tasks = args.max_concurrent_tasks;
        analysis.max_loaded_targets_size = args.max_loaded_size;
    }
    if args.no_combined {
        analysis.combined_analysis = Some(false);
    }
    // Interactive runs stop on Ctrl-C unless a config file says otherwise.
    analysis.signal_cancellation.get_or_insert(true);

    let selector = &mut config.selector;
    if !args.only.is_empty() {
        selector.mode = SelectionMode::IncludeSelected;
        selector.reports.clone_from(&args.only);
    } else if !args.skip.is_empty() {
        selector.mode = SelectionMode::ExcludeSelected;
        selector.reports.clone_from(&args.skip);
    }
    selector.excluded_levels.extend(args.exclude_levels.iter().copied());
    selector.excluded_categories.extend(args.exclude_categories.iter().copied());

    if !args.output.is_empty() {
        config.outputs.clone_from(&args.output);
    }
}

/// Loads the layered configuration, applies `args` and builds the plan.
///
/// # Errors
///
/// Returns the configuration or plan error unchanged so the caller can map
/// it to [`ExitCode::ConfigError`].
pub fn build_plan(args: &AnalyzeArgs, root: &Path) -> valentine_analysis::AnalysisResult<AnalysisPlan> {
    let mut config = load_config(Some(root), args.config.as_deref())?;
    apply_overrides(&mut config, args);
    let mut plan = config.into_plan(root)?;
    plan.terminal_output = !args.quiet;
    plan.resources = Some(Arc::new(valentine_pe::report_titles()));
    Ok(plan)
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `analyze` subcommand.
///
/// Returns an [`ExitCode`] indicating the outcome of the analysis.
pub fn execute(args: AnalyzeArgs) -> Result<ExitCode, anyhow::Error> {
    // Ignore the error if the subscriber is already set (e.g. in tests).
    let _ = valentine_core::init_tracing(args.verbose, args.quiet, args.log_json);

    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("failed to determine the current directory")?,
    };

    let mut plan = match build_plan(&args, &root) {
        Ok(plan) => plan,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("valentine: {err}");
            return Ok(ExitCode::ConfigError);
        }
    };

    let progress = (!args.quiet && !args.no_progress).then(|| Arc::new(ProgressBarReport::new()));
    if let Some(progress) = &progress {
        plan.progress = Some(progress.clone());
    }

    let registry = valentine_pe::engine_registry().context("failed to register built-in rules")?;
    let runner = AnalysisPlanRunner::new(plan, Arc::new(registry))
        .context("failed to prepare the analysis")?;
    let summary = runner.run().context("analysis failed")?;

    if let Some(progress) = progress {
        progress.finish();
    }
    if !args.quiet {
        summary.report_finished(TerminalReport.common_report().as_ref());
    }
    info!(
        analyzed = summary.stats.analyzed,
        entity_issues = summary.entity_issues,
        analysis_issues = summary.analysis_issues,
        duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
        "analysis completed"
    );

    Ok(ExitCode::for_summary(&summary))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use valentine_analysis::PreloadLimit;

    fn quiet_args(targets: Vec<PathBuf>) -> AnalyzeArgs {
        AnalyzeArgs {
            targets,
            quiet: true,
            ..AnalyzeArgs::default()
        }
    }

    #[test]
    fn parses_output_specs() {
        let output = parse_output("sarif:reports/out.sarif").unwrap();
        assert_eq!(output.format, OutputFormat::Sarif);
        assert_eq!(output.path, PathBuf::from("reports/out.sarif"));

        assert!(parse_output("json").is_err());
        assert!(parse_output("json:").is_err());
        assert!(parse_output("yaml:out.yaml").is_err());
    }

    #[test]
    fn command_line_targets_replace_configured_ones() {
        let mut config = PlanConfig::default();
        config.targets.push(TargetConfig::new("configured"));
        config.selector.reports.push("PE001".to_string());

        let args = AnalyzeArgs {
            targets: vec![PathBuf::from("bin"), PathBuf::from("lib")],
            no_recursive: true,
            exclude: vec!["\\.pdb$".to_string()],
            only: vec!["PE019".to_string(), "PE056".to_string()],
            ..AnalyzeArgs::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.targets.len(), 2);
        assert!(config.targets.iter().all(|t| !t.recursive));
        assert_eq!(config.targets[1].exclude_regex, vec!["\\.pdb$".to_string()]);
        assert_eq!(config.selector.mode, SelectionMode::IncludeSelected);
        assert_eq!(config.selector.reports, vec!["PE019", "PE056"]);
    }

    #[test]
    fn limit_flags_replace_both_configured_limits() {
        let mut config = PlanConfig::default();
        config.analysis.max_loaded_targets_size = Some(1 << 20);

        let args = AnalyzeArgs {
            max_concurrent_tasks: Some(4),
            threads: Some(2),
            no_combined: true,
            ..AnalyzeArgs::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.analysis.max_concurrent_tasks, Some(4));
        assert_eq!(config.analysis.max_loaded_targets_size, None);
        assert_eq!(config.analysis.thread_count, Some(2));
        assert_eq!(config.analysis.combined_analysis, Some(false));
        assert_eq!(config.analysis.signal_cancellation, Some(true));
    }

    #[test]
    fn plan_is_built_from_project_config_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(valentine_analysis::config::CONFIG_FILE_NAME),
            "analysis:\n  max_concurrent_tasks: 3\ntargets:\n  - path: bin\n",
        )
        .unwrap();

        let plan = build_plan(&AnalyzeArgs::default(), dir.path()).unwrap();
        assert_eq!(plan.preload_limit, PreloadLimit::MaxConcurrentTasks(3));
        assert_eq!(plan.targets[0].path, PathBuf::from("bin"));
        assert!(plan.terminal_output);
        assert!(plan.signal_cancellation);
        assert!(plan.resources.is_some());

        let plan = build_plan(&quiet_args(vec![PathBuf::from("other")]), dir.path()).unwrap();
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].path, PathBuf::from("other"));
        assert!(!plan.terminal_output);
    }

    #[test]
    fn configuration_problems_exit_with_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad_regex = AnalyzeArgs {
            root: Some(dir.path().to_path_buf()),
            include: vec!["(".to_string()],
            ..quiet_args(vec![dir.path().to_path_buf()])
        };
        assert_eq!(execute(bad_regex).unwrap(), ExitCode::ConfigError);

        let no_targets = AnalyzeArgs {
            root: Some(dir.path().to_path_buf()),
            ..quiet_args(Vec::new())
        };
        assert_eq!(execute(no_targets).unwrap(), ExitCode::ConfigError);

        let missing_config = AnalyzeArgs {
            root: Some(dir.path().to_path_buf()),
            config: Some(dir.path().join("absent.yaml")),
            ..quiet_args(vec![dir.path().to_path_buf()])
        };
        assert_eq!(execute(missing_config).unwrap(), ExitCode::ConfigError);
    }

    #[test]
    fn directory_without_images_passes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), "nothing to see").unwrap();
        let report = dir.path().join("out.json");

        let args = AnalyzeArgs {
            root: Some(dir.path().to_path_buf()),
            output: vec![OutputConfig {
                format: OutputFormat::Json,
                path: report.clone(),
            }],
            ..quiet_args(vec![dir.path().to_path_buf()])
        };
        assert_eq!(execute(args).unwrap(), ExitCode::Pass);
        assert!(report.is_file());
    }
}
