//! The plan runner: report wiring around one executor run, and output files.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use valentine_core::messages::{self, arg};
use valentine_core::report::{CommonReport, NamedArg, ReportFactory, ReportLevel};
use valentine_report::fanout::FanOutFactory;
use valentine_report::terminal::TerminalReport;
use valentine_report::{write_output, InMemoryReport, ReportSnapshot};

use crate::executor::{ConcurrentExecutor, StopHandle};
use crate::plan::AnalysisPlan;
use crate::registry::EngineRegistry;
use crate::stats::{AnalysisStats, ExtendedStatsProgress, IssueTracking};
use crate::AnalysisResult;

/// Result of a finished (or interrupted) run.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    /// Wall-clock start.
    pub start: Option<DateTime<Utc>>,
    /// Wall-clock end.
    pub end: Option<DateTime<Utc>>,
    /// Monotonic duration.
    pub duration: Duration,
    /// Engine diagnostics logged during the run.
    pub analysis_issues: u64,
    /// Rule findings logged during the run.
    pub entity_issues: u64,
    /// Whether a stop was requested.
    pub interrupted: bool,
    /// Target counts.
    pub stats: AnalysisStats,
    /// Largest admitted weight observed at once.
    pub peak_weight: u64,
    /// Everything reported during the run.
    pub snapshot: ReportSnapshot,
}

impl AnalysisSummary {
    /// Logs `analysis_finished_message` (or `analysis_interrupted_message`)
    /// with the run's counts to `report`.
    pub fn report_finished(&self, report: &dyn CommonReport) {
        let message_id = if self.interrupted {
            messages::ANALYSIS_INTERRUPTED_MESSAGE
        } else {
            messages::ANALYSIS_FINISHED_MESSAGE
        };
        let duration_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);
        report.log(
            ReportLevel::Info,
            message_id,
            &[
                NamedArg::new(arg::DURATION_MS, duration_ms),
                NamedArg::new(arg::ENTITY_ISSUES, self.entity_issues),
                NamedArg::new(arg::ANALYSIS_ISSUES, self.analysis_issues),
                NamedArg::new(arg::ANALYZED, self.stats.analyzed),
                NamedArg::new(arg::SKIPPED_UNSUPPORTED, self.stats.skipped_unsupported),
                NamedArg::new(arg::SKIPPED_FILTERED, self.stats.skipped_filtered),
            ],
        );
    }
}

/// Runs one [`AnalysisPlan`] and persists its outputs.
///
/// Every report goes to an issue counter and to an in-memory store, plus the
/// terminal when the plan asks for it and any extra factories supplied.
pub struct AnalysisPlanRunner {
    plan: Arc<AnalysisPlan>,
    store: Arc<InMemoryReport>,
    issues: Arc<IssueTracking>,
    stats: Arc<ExtendedStatsProgress>,
    common: Arc<dyn CommonReport>,
    executor: ConcurrentExecutor,
}

impl AnalysisPlanRunner {
    /// Prepares a run of `plan` with the rules and generators of `registry`.
    ///
    /// # Errors
    ///
    /// See [`ConcurrentExecutor::new`].
    pub fn new(plan: AnalysisPlan, registry: Arc<EngineRegistry>) -> AnalysisResult<Self> {
        Self::with_reports(plan, registry, Vec::new())
    }

    /// Like [`new`](Self::new), additionally forwarding every report to `extra`.
    ///
    /// # Errors
    ///
    /// See [`ConcurrentExecutor::new`].
    pub fn with_reports(
        plan: AnalysisPlan,
        registry: Arc<EngineRegistry>,
        extra: Vec<Arc<dyn ReportFactory>>,
    ) -> AnalysisResult<Self> {
        let plan = Arc::new(plan);
        let store = Arc::new(InMemoryReport::new());
        let issues = Arc::new(IssueTracking::new());

        let mut factory = FanOutFactory::new().with(issues.clone()).with(store.clone());
        if plan.terminal_output {
            factory = factory.with(Arc::new(TerminalReport));
        }
        for target in extra {
            factory = factory.with(target);
        }
        let factory: Arc<dyn ReportFactory> = Arc::new(factory);
        let common = factory.common_report();

        let startup = registry.startup_report();
        if !startup.is_empty() {
            info!(messages = startup.len(), "replaying start-up diagnostics");
            startup.replay_into(common.as_ref());
        }

        let stats = Arc::new(ExtendedStatsProgress::new(plan.progress.clone()));
        let executor =
            ConcurrentExecutor::new(plan.clone(), registry, factory, Some(stats.clone()))?;
        Ok(Self {
            plan,
            store,
            issues,
            stats,
            common,
            executor,
        })
    }

    /// A handle that stops the run.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.executor.stop_handle()
    }

    /// Runs the plan, blocking until it completes or is stopped, then writes
    /// every configured output.
    ///
    /// Output write failures do not fail the run; each is reported as
    /// critical `writing_report_error` and counted as an analysis issue.
    ///
    /// # Errors
    ///
    /// Returns an error only if the executor cannot start its thread pools.
    pub fn run(self) -> AnalysisResult<AnalysisSummary> {
        let Self {
            plan,
            store,
            issues,
            stats,
            common,
            executor,
        } = self;
        let outcome = executor.run()?;
        write_outputs(&plan, common.as_ref(), &store.snapshot());

        let interrupted = outcome.time.is_interrupted();
        // The stop request itself is logged, but is not an issue of the analysis.
        let analysis_issues = issues.analysis_issues().saturating_sub(u64::from(interrupted));
        Ok(AnalysisSummary {
            start: outcome.time.start_time(),
            end: outcome.time.end_time(),
            duration: outcome.time.duration(),
            analysis_issues,
            entity_issues: issues.entity_issues(),
            interrupted,
            stats: stats.stats(),
            peak_weight: outcome.peak_weight,
            snapshot: store.snapshot(),
        })
    }
}

fn write_outputs(plan: &AnalysisPlan, common: &dyn CommonReport, snapshot: &ReportSnapshot) {
    for output in &plan.outputs {
        let path = plan.resolve_path(&output.path);
        match write_output(output.format, snapshot, &path, plan.resources.as_deref()) {
            Ok(()) => info!(path = %path.display(), format = %output.format, "report written"),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to write report");
                common.log(
                    ReportLevel::Critical,
                    messages::WRITING_REPORT_ERROR,
                    &[
                        NamedArg::new(arg::PATH, path.display().to_string()),
                        NamedArg::new(arg::FORMAT, output.format.to_string()),
                        NamedArg::new(arg::EXCEPTION, err.to_string()),
                    ],
                );
            }
        }
    }
}
