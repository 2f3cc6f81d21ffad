//! The analysis plan: targets, selectors, limits and outputs of one run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use valentine_core::entity::SubjectEntity;
use valentine_core::progress::ProgressReport;
use valentine_core::report::ResourceProvider;
use valentine_core::selector::RuleSelector;
use valentine_core::{CoreError, CoreResult};
use valentine_report::OutputFormat;

use crate::{AnalysisError, AnalysisResult};

/// Default number of targets admitted to the CPU pool at once.
pub const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 10;

/// Default number of loaded bytes admitted to the CPU pool at once (1 GiB).
pub const DEFAULT_MAX_LOADED_TARGETS_SIZE: u64 = 1 << 30;

/// Worker count used when neither the plan nor the OS gives one.
const FALLBACK_THREAD_COUNT: usize = 4;

// ---------------------------------------------------------------------------
// TargetFilter
// ---------------------------------------------------------------------------

/// Include/exclude regular expressions over target paths.
///
/// Patterns use search semantics against the path text. An empty include
/// list includes everything; a matching exclude pattern always wins.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl TargetFilter {
    /// Creates a filter accepting every path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegex`] if `pattern` does not compile.
    pub fn add_include_regex(&mut self, pattern: &str) -> CoreResult<()> {
        self.include.push(compile(pattern)?);
        Ok(())
    }

    /// Adds an exclude pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegex`] if `pattern` does not compile.
    pub fn add_exclude_regex(&mut self, pattern: &str) -> CoreResult<()> {
        self.exclude.push(compile(pattern)?);
        Ok(())
    }

    /// Returns `true` if `path` passes the filter.
    #[must_use]
    pub fn satisfies(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if self.exclude.iter().any(|re| re.is_match(&text)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(&text))
    }

    /// The include patterns as written.
    pub fn include_patterns(&self) -> impl Iterator<Item = &str> {
        self.include.iter().map(Regex::as_str)
    }

    /// The exclude patterns as written.
    pub fn exclude_patterns(&self) -> impl Iterator<Item = &str> {
        self.exclude.iter().map(Regex::as_str)
    }
}

fn compile(pattern: &str) -> CoreResult<Regex> {
    Regex::new(pattern).map_err(|source| CoreError::InvalidRegex {
        pattern: pattern.to_owned(),
        source,
    })
}

// ---------------------------------------------------------------------------
// PlanTarget
// ---------------------------------------------------------------------------

/// A file or directory to analyze.
#[derive(Debug, Clone)]
pub struct PlanTarget {
    /// Target path; relative paths are joined to the plan root.
    pub path: PathBuf,
    /// Whether directories are walked recursively.
    pub recursive: bool,
    /// Path filter applied to every enumerated file.
    pub filter: TargetFilter,
    /// Selector replacing the global selector for this target.
    pub selector: Option<Arc<RuleSelector>>,
}

impl PlanTarget {
    /// A recursive target without filter or own selector.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
            filter: TargetFilter::new(),
            selector: None,
        }
    }

    /// Sets recursion.
    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Sets the path filter.
    #[must_use]
    pub fn with_filter(mut self, filter: TargetFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets a target specific selector.
    #[must_use]
    pub fn with_selector(mut self, selector: RuleSelector) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }
}

// ---------------------------------------------------------------------------
// PreloadLimit
// ---------------------------------------------------------------------------

/// Bound on loaded-but-unprocessed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadLimit {
    /// At most this many targets; every target weighs 1.
    MaxConcurrentTasks(u32),
    /// At most this many bytes; every target weighs its size.
    MaxLoadedTargetsSize(u64),
}

impl Default for PreloadLimit {
    fn default() -> Self {
        Self::MaxConcurrentTasks(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}

impl PreloadLimit {
    /// The admission limit, never zero.
    #[must_use]
    pub fn limit(self) -> u64 {
        match self {
            Self::MaxConcurrentTasks(count) => u64::from(count).max(1),
            Self::MaxLoadedTargetsSize(bytes) => bytes.max(1),
        }
    }

    /// Admission weight of `entity`.
    #[must_use]
    pub fn weight(self, entity: &dyn SubjectEntity) -> u64 {
        match self {
            Self::MaxConcurrentTasks(_) => 1,
            Self::MaxLoadedTargetsSize(_) => entity.size(),
        }
    }
}

impl fmt::Display for PreloadLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxConcurrentTasks(count) => write!(f, "{count} targets"),
            Self::MaxLoadedTargetsSize(bytes) => write!(f, "{bytes} bytes"),
        }
    }
}

// ---------------------------------------------------------------------------
// OutputSpec
// ---------------------------------------------------------------------------

/// An output report written after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output format.
    pub format: OutputFormat,
    /// Destination; relative paths are joined to the plan root.
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// AnalysisPlan
// ---------------------------------------------------------------------------

/// Everything the executor needs to know about one run.
#[derive(Clone)]
pub struct AnalysisPlan {
    /// Base of relative target and output paths.
    pub root_path: PathBuf,
    /// What to analyze.
    pub targets: Vec<PlanTarget>,
    /// CPU worker count; `None` means hardware concurrency.
    pub thread_count: Option<usize>,
    /// Admission limit between the I/O and CPU pools.
    pub preload_limit: PreloadLimit,
    /// Whether the cross-entity phase runs.
    pub combined_analysis: bool,
    /// Selector of targets without their own.
    pub global_selector: Arc<RuleSelector>,
    /// Files written after the run.
    pub outputs: Vec<OutputSpec>,
    /// Whether reports are rendered live through `tracing`.
    pub terminal_output: bool,
    /// Receiver of progress notifications.
    pub progress: Option<Arc<dyn ProgressReport>>,
    /// Report descriptions used by the text and SARIF outputs.
    pub resources: Option<Arc<dyn ResourceProvider>>,
    /// Whether Ctrl-C (and SIGTERM on unix) stop the run.
    pub signal_cancellation: bool,
}

impl fmt::Debug for AnalysisPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPlan")
            .field("root_path", &self.root_path)
            .field("targets", &self.targets)
            .field("thread_count", &self.thread_count)
            .field("preload_limit", &self.preload_limit)
            .field("combined_analysis", &self.combined_analysis)
            .field("outputs", &self.outputs)
            .field("terminal_output", &self.terminal_output)
            .field("signal_cancellation", &self.signal_cancellation)
            .finish_non_exhaustive()
    }
}

impl AnalysisPlan {
    /// An empty plan rooted at `root_path`.
    #[must_use]
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            targets: Vec::new(),
            thread_count: None,
            preload_limit: PreloadLimit::default(),
            combined_analysis: true,
            global_selector: Arc::new(RuleSelector::new()),
            outputs: Vec::new(),
            terminal_output: false,
            progress: None,
            resources: None,
            signal_cancellation: false,
        }
    }

    /// Checks that the plan can be run.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Plan`] if there is no target or a limit is zero.
    pub fn validate(&self) -> AnalysisResult<()> {
        if self.targets.is_empty() {
            return Err(AnalysisError::Plan("no targets to analyze".to_owned()));
        }
        if self.thread_count == Some(0) {
            return Err(AnalysisError::Plan("thread count must be positive".to_owned()));
        }
        match self.preload_limit {
            PreloadLimit::MaxConcurrentTasks(0) | PreloadLimit::MaxLoadedTargetsSize(0) => Err(
                AnalysisError::Plan(format!("preload limit must be positive, got {}", self.preload_limit)),
            ),
            _ => Ok(()),
        }
    }

    /// Number of CPU workers: the plan value, else hardware concurrency, else 4.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.thread_count.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(FALLBACK_THREAD_COUNT, usize::from)
        })
    }

    /// Joins a relative `path` to the root.
    #[must_use]
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.root_path.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// The selector applying to `target`.
    #[must_use]
    pub fn selector_for(&self, target: &PlanTarget) -> Arc<RuleSelector> {
        target
            .selector
            .clone()
            .unwrap_or_else(|| self.global_selector.clone())
    }

    /// The global selector followed by every target specific selector.
    #[must_use]
    pub fn all_selectors(&self) -> Vec<&RuleSelector> {
        std::iter::once(self.global_selector.as_ref())
            .chain(self.targets.iter().filter_map(|t| t.selector.as_deref()))
            .collect()
    }
}
