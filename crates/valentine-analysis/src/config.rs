//! YAML configuration of an analysis run.
//!
//! Configuration is read from `.valentine.yaml` files and layered:
//! built-in defaults, then the home directory, then the project root, then
//! an explicitly named file. Command-line flags are applied by the caller on
//! the merged [`PlanConfig`] before [`PlanConfig::into_plan`] turns it into
//! an [`AnalysisPlan`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use valentine_core::report::{ReportCategory, ReportLevel};
use valentine_core::selector::RuleSelector;
use valentine_core::{Aggregation, CoreError, SelectionMode};
use valentine_report::OutputFormat;

use crate::plan::{AnalysisPlan, OutputSpec, PlanTarget, PreloadLimit, TargetFilter};
use crate::{AnalysisError, AnalysisResult};

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".valentine.yaml";

// ---------------------------------------------------------------------------
// PlanConfig
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Executor settings.
    pub analysis: AnalysisSection,
    /// Global rule selector.
    pub selector: SelectorConfig,
    /// Files and directories to analyze.
    pub targets: Vec<TargetConfig>,
    /// Reports written after the run.
    pub outputs: Vec<OutputConfig>,
}

/// Executor settings. Unset values fall back to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Number of CPU workers.
    pub thread_count: Option<usize>,
    /// Count-based preload limit. Exclusive with `max_loaded_targets_size`.
    pub max_concurrent_tasks: Option<u32>,
    /// Size-based preload limit in bytes.
    pub max_loaded_targets_size: Option<u64>,
    /// Whether combined rules run after the per-target phase.
    pub combined_analysis: Option<bool>,
    /// Whether Ctrl+C / SIGTERM stop the run.
    pub signal_cancellation: Option<bool>,
}

/// A rule selector as written in YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// How `reports` is interpreted.
    pub mode: SelectionMode,
    /// Report uids to include or exclude.
    pub reports: Vec<String>,
    /// Levels whose reports are disabled.
    pub excluded_levels: Vec<ReportLevel>,
    /// Categories whose reports are disabled.
    pub excluded_categories: Vec<ReportCategory>,
    /// Argument filters keyed by report uid.
    pub report_filters: BTreeMap<String, ReportFilterConfig>,
}

/// Argument regexes for one report uid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFilterConfig {
    /// Whether matching reports are kept or dropped.
    pub mode: SelectionMode,
    /// How matches of several arguments combine.
    pub aggregation: Aggregation,
    /// Regex per argument name.
    pub args: BTreeMap<String, String>,
}

/// One target as written in YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// File or directory; relative paths join the plan root.
    pub path: PathBuf,
    /// Whether directories are walked recursively.
    pub recursive: bool,
    /// Paths must match one of these, if any are given.
    pub include_regex: Vec<String>,
    /// Paths matching any of these are skipped.
    pub exclude_regex: Vec<String>,
    /// Selector replacing the global one for this target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorConfig>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            recursive: true,
            include_regex: Vec::new(),
            exclude_regex: Vec::new(),
            selector: None,
        }
    }
}

impl TargetConfig {
    /// A recursive target without filters.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// One output report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format.
    pub format: OutputFormat,
    /// Destination; relative paths join the plan root.
    pub path: PathBuf,
}

impl PlanConfig {
    /// Builds and validates the plan described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Config`] for conflicting limits or a regex
    /// that does not compile, and [`AnalysisError::Plan`] if the resulting
    /// plan is invalid (no targets, zero threads or a zero limit).
    pub fn into_plan(self, root: &Path) -> AnalysisResult<AnalysisPlan> {
        let mut plan = AnalysisPlan::new(root);
        plan.thread_count = self.analysis.thread_count;
        plan.preload_limit = preload_limit(&self.analysis)?;
        if let Some(combined) = self.analysis.combined_analysis {
            plan.combined_analysis = combined;
        }
        if let Some(signals) = self.analysis.signal_cancellation {
            plan.signal_cancellation = signals;
        }
        plan.global_selector = Arc::new(build_selector(&self.selector, "selector")?);

        for target in self.targets {
            let scope = format!("target '{}'", target.path.display());
            let mut filter = TargetFilter::new();
            for pattern in &target.include_regex {
                filter
                    .add_include_regex(pattern)
                    .map_err(|e| config_error(&scope, &e))?;
            }
            for pattern in &target.exclude_regex {
                filter
                    .add_exclude_regex(pattern)
                    .map_err(|e| config_error(&scope, &e))?;
            }
            let mut planned = PlanTarget::new(target.path)
                .with_recursive(target.recursive)
                .with_filter(filter);
            if let Some(selector) = &target.selector {
                planned = planned.with_selector(build_selector(selector, &scope)?);
            }
            plan.targets.push(planned);
        }

        plan.outputs = self
            .outputs
            .into_iter()
            .map(|output| OutputSpec {
                format: output.format,
                path: output.path,
            })
            .collect();

        plan.validate()?;
        Ok(plan)
    }

    /// Renders the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Config`] if serialization fails.
    pub fn to_yaml(&self) -> AnalysisResult<String> {
        serde_yml::to_string(self)
            .map_err(|e| AnalysisError::Config(format!("failed to render configuration: {e}")))
    }
}

fn preload_limit(analysis: &AnalysisSection) -> AnalysisResult<PreloadLimit> {
    match (analysis.max_concurrent_tasks, analysis.max_loaded_targets_size) {
        (Some(_), Some(_)) => Err(AnalysisError::Config(
            "max_concurrent_tasks and max_loaded_targets_size are mutually exclusive".to_string(),
        )),
        (Some(count), None) => Ok(PreloadLimit::MaxConcurrentTasks(count)),
        (None, Some(bytes)) => Ok(PreloadLimit::MaxLoadedTargetsSize(bytes)),
        (None, None) => Ok(PreloadLimit::default()),
    }
}

fn build_selector(config: &SelectorConfig, scope: &str) -> AnalysisResult<RuleSelector> {
    let mut selector = RuleSelector::new();
    selector.set_mode(config.mode);
    for uid in &config.reports {
        selector.add_selected_uid(uid.clone());
    }
    for level in &config.excluded_levels {
        selector.exclude_level(*level, true);
    }
    for category in &config.excluded_categories {
        selector.exclude_category(*category, true);
    }
    for (uid, filter) in &config.report_filters {
        let report = selector.report_selector_mut(uid.clone());
        report.set_mode(filter.mode);
        report.set_aggregation(filter.aggregation);
        for (arg, pattern) in &filter.args {
            report
                .add_regex(arg.clone(), pattern)
                .map_err(|e| config_error(&format!("{scope}, report {uid}"), &e))?;
        }
    }
    Ok(selector)
}

fn config_error(scope: &str, err: &CoreError) -> AnalysisError {
    AnalysisError::Config(format!("{scope}: {err}"))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Loads and merges configuration from every layer.
///
/// Resolution order (highest priority first):
/// 1. CLI overrides (applied by the caller after loading)
/// 2. `explicit`, which must exist when given
/// 3. `.valentine.yaml` in `project_dir`
/// 4. `.valentine.yaml` in the user home directory
/// 5. Built-in defaults
///
/// # Errors
///
/// Returns [`AnalysisError::Config`] if a config file is malformed, or if
/// `explicit` cannot be read.
pub fn load_config(project_dir: Option<&Path>, explicit: Option<&Path>) -> AnalysisResult<PlanConfig> {
    load_layers(home_dir().as_deref(), project_dir, explicit)
}

fn load_layers(
    home: Option<&Path>,
    project_dir: Option<&Path>,
    explicit: Option<&Path>,
) -> AnalysisResult<PlanConfig> {
    let mut config = PlanConfig::default();

    for (kind, dir) in [("home", home), ("project", project_dir)] {
        let Some(dir) = dir else { continue };
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            debug!(path = %path.display(), "loading {kind} config");
            config = merge_config(config, load_config_file(&path)?);
        }
    }

    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading explicit config");
        config = merge_config(config, load_config_file(path)?);
    }

    info!("configuration loaded");
    Ok(config)
}

fn load_config_file(path: &Path) -> AnalysisResult<PlanConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::Config(format!("failed to read config file '{}': {e}", path.display()))
    })?;

    serde_yml::from_str(&content).map_err(|e| {
        AnalysisError::Config(format!("failed to parse config file '{}': {e}", path.display()))
    })
}

/// Merges `overlay` on top of `base`.
///
/// Analysis settings merge field by field. The selector, target and output
/// sections are replaced as a whole when the overlay sets them.
fn merge_config(base: PlanConfig, overlay: PlanConfig) -> PlanConfig {
    PlanConfig {
        analysis: merge_analysis(base.analysis, overlay.analysis),
        selector: if overlay.selector == SelectorConfig::default() {
            base.selector
        } else {
            overlay.selector
        },
        targets: if overlay.targets.is_empty() {
            base.targets
        } else {
            overlay.targets
        },
        outputs: if overlay.outputs.is_empty() {
            base.outputs
        } else {
            overlay.outputs
        },
    }
}

fn merge_analysis(base: AnalysisSection, overlay: AnalysisSection) -> AnalysisSection {
    // The two limits are one setting; an overlay naming either replaces both.
    let limits_set =
        overlay.max_concurrent_tasks.is_some() || overlay.max_loaded_targets_size.is_some();
    let (max_concurrent_tasks, max_loaded_targets_size) = if limits_set {
        (overlay.max_concurrent_tasks, overlay.max_loaded_targets_size)
    } else {
        (base.max_concurrent_tasks, base.max_loaded_targets_size)
    };
    AnalysisSection {
        thread_count: overlay.thread_count.or(base.thread_count),
        max_concurrent_tasks,
        max_loaded_targets_size,
        combined_analysis: overlay.combined_analysis.or(base.combined_analysis),
        signal_cancellation: overlay.signal_cancellation.or(base.signal_cancellation),
    }
}

/// Get the user home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use valentine_core::report::{NamedArg, ReportDescriptor};

    const FULL: &str = r#"
analysis:
  thread_count: 3
  max_loaded_targets_size: 1048576
  combined_analysis: false
selector:
  mode: include_selected
  reports: [PE019, PE056]
  excluded_levels: [info]
  excluded_categories: [optimization]
  report_filters:
    PE019:
      mode: exclude_selected
      aggregation: all
      args:
        path: "\\.dll$"
targets:
  - path: bin
    recursive: false
    include_regex: ["\\.exe$"]
  - path: lib
    exclude_regex: ["test"]
    selector:
      reports: [PE016]
outputs:
  - format: sarif
    path: out/report.sarif
"#;

    #[test]
    fn default_config_is_empty() {
        let config = PlanConfig::default();
        assert!(config.targets.is_empty());
        assert!(config.outputs.is_empty());
        assert_eq!(config.analysis, AnalysisSection::default());
        assert_eq!(config.selector.mode, SelectionMode::ExcludeSelected);
    }

    #[test]
    fn load_config_from_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), FULL).unwrap();

        let config = load_layers(None, Some(tmp.path()), None).unwrap();

        assert_eq!(config.analysis.thread_count, Some(3));
        assert_eq!(config.analysis.max_loaded_targets_size, Some(1_048_576));
        assert_eq!(config.analysis.combined_analysis, Some(false));
        assert_eq!(config.selector.mode, SelectionMode::IncludeSelected);
        assert_eq!(config.selector.reports, vec!["PE019", "PE056"]);
        assert_eq!(config.selector.excluded_levels, vec![ReportLevel::Info]);
        assert_eq!(config.targets.len(), 2);
        assert!(!config.targets[0].recursive);
        assert!(config.targets[1].recursive);
        assert_eq!(config.outputs[0].format, OutputFormat::Sarif);
    }

    #[test]
    fn missing_files_return_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_layers(Some(tmp.path()), Some(tmp.path()), None).unwrap();
        assert_eq!(config, PlanConfig::default());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "analysis: [yaml: {broken").unwrap();
        let result = load_layers(None, Some(tmp.path()), None);
        assert!(matches!(result, Err(AnalysisError::Config(msg)) if msg.contains("failed to parse")));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = load_layers(None, None, Some(&tmp.path().join("nope.yaml")));
        assert!(matches!(result, Err(AnalysisError::Config(msg)) if msg.contains("failed to read")));
    }

    #[test]
    fn layers_override_in_order() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        fs::write(
            home.path().join(CONFIG_FILE_NAME),
            "analysis:\n  thread_count: 2\n  max_concurrent_tasks: 5\n  signal_cancellation: false\n",
        )
        .unwrap();
        fs::write(
            project.path().join(CONFIG_FILE_NAME),
            "analysis:\n  max_loaded_targets_size: 4096\ntargets:\n  - path: a\n",
        )
        .unwrap();
        let explicit = project.path().join("ci.yaml");
        fs::write(&explicit, "analysis:\n  thread_count: 8\n").unwrap();

        let config = load_layers(Some(home.path()), Some(project.path()), Some(&explicit)).unwrap();

        assert_eq!(config.analysis.thread_count, Some(8));
        assert_eq!(config.analysis.max_concurrent_tasks, None);
        assert_eq!(config.analysis.max_loaded_targets_size, Some(4096));
        assert_eq!(config.analysis.signal_cancellation, Some(false));
        assert_eq!(config.targets, vec![TargetConfig::new("a")]);
    }

    #[test]
    fn into_plan_builds_targets_selectors_and_outputs() {
        let config: PlanConfig = serde_yml::from_str(FULL).unwrap();
        let plan = config.into_plan(Path::new("/scan")).unwrap();

        assert_eq!(plan.thread_count, Some(3));
        assert_eq!(plan.preload_limit, PreloadLimit::MaxLoadedTargetsSize(1_048_576));
        assert!(!plan.combined_analysis);
        assert_eq!(plan.targets.len(), 2);
        assert!(!plan.targets[0].recursive);
        assert!(plan.targets[0].filter.satisfies(Path::new("/scan/bin/a.exe")));
        assert!(!plan.targets[0].filter.satisfies(Path::new("/scan/bin/a.dll")));
        assert!(!plan.targets[1].filter.satisfies(Path::new("/scan/lib/test/a.dll")));
        assert!(plan.targets[1].selector.is_some());
        assert_eq!(plan.outputs[0].path, PathBuf::from("out/report.sarif"));

        let pe019 = ReportDescriptor::new("PE019", ReportCategory::Security, ReportLevel::Warning);
        let pe016 = ReportDescriptor::new("PE016", ReportCategory::Security, ReportLevel::Warning);
        let selector = &plan.global_selector;
        assert!(selector.is_enabled(&pe019));
        assert!(!selector.is_enabled(&pe016));
        assert!(!selector.is_enabled_with_args(&pe019, &[NamedArg::new("path", "x.dll")]));
        assert!(selector.is_enabled_with_args(&pe019, &[NamedArg::new("path", "x.exe")]));
    }

    #[test]
    fn invalid_regex_names_the_pattern() {
        let mut config = PlanConfig::default();
        let mut target = TargetConfig::new("bin");
        target.exclude_regex.push("([".to_string());
        config.targets.push(target);

        let err = config.into_plan(Path::new("/scan")).unwrap_err();
        assert!(matches!(&err, AnalysisError::Config(msg) if msg.contains("([")), "{err}");
    }

    #[test]
    fn conflicting_limits_are_rejected() {
        let mut config = PlanConfig::default();
        config.targets.push(TargetConfig::new("bin"));
        config.analysis.max_concurrent_tasks = Some(4);
        config.analysis.max_loaded_targets_size = Some(4096);
        assert!(matches!(
            config.into_plan(Path::new("/scan")),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn plan_without_targets_is_invalid() {
        assert!(matches!(
            PlanConfig::default().into_plan(Path::new("/scan")),
            Err(AnalysisError::Plan(_))
        ));
    }

    #[test]
    fn yaml_rendering_parses_back() {
        let config: PlanConfig = serde_yml::from_str(FULL).unwrap();
        let rendered = config.to_yaml().unwrap();
        let parsed: PlanConfig = serde_yml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
