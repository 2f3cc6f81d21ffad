//! Run statistics: progress counters and issue counters.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use valentine_core::entity::SubjectEntity;
use valentine_core::progress::{ProgressReport, ProgressState};
use valentine_core::report::{
    CommonReport, EntityReport, NamedArg, ReportDescriptor, ReportFactory, ReportLevel,
};

// ---------------------------------------------------------------------------
// Progress statistics
// ---------------------------------------------------------------------------

/// Target counts collected from progress notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisStats {
    /// Targets whose rule evaluation completed.
    pub analyzed: u32,
    /// Targets without a detected rule class.
    pub skipped_unsupported: u32,
    /// Targets rejected by a path filter.
    pub skipped_filtered: u32,
}

/// Progress sink counting outcomes before forwarding to an optional inner sink.
#[derive(Default)]
pub struct ExtendedStatsProgress {
    next: Option<Arc<dyn ProgressReport>>,
    analyzed: AtomicU32,
    skipped_unsupported: AtomicU32,
    skipped_filtered: AtomicU32,
}

impl ExtendedStatsProgress {
    /// Wraps `next`.
    #[must_use]
    pub fn new(next: Option<Arc<dyn ProgressReport>>) -> Self {
        Self {
            next,
            ..Self::default()
        }
    }

    /// The counts so far.
    #[must_use]
    pub fn stats(&self) -> AnalysisStats {
        AnalysisStats {
            analyzed: self.analyzed.load(Ordering::Relaxed),
            skipped_unsupported: self.skipped_unsupported.load(Ordering::Relaxed),
            skipped_filtered: self.skipped_filtered.load(Ordering::Relaxed),
        }
    }
}

impl ProgressReport for ExtendedStatsProgress {
    fn report_progress(&self, entity: Option<&dyn SubjectEntity>, state: ProgressState) {
        if let Some(next) = &self.next {
            next.report_progress(entity, state);
        }
        let counter = match state {
            ProgressState::AnalysisCompleted => &self.analyzed,
            ProgressState::TargetSkippedUnsupported => &self.skipped_unsupported,
            ProgressState::TargetSkippedFiltered => &self.skipped_filtered,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Issue tracking
// ---------------------------------------------------------------------------

/// Report factory counting diagnostics and findings.
///
/// Every `log` (run-level or entity-level) is an analysis issue; every rule
/// finding is an entity issue.
#[derive(Debug, Default)]
pub struct IssueTracking {
    status: Arc<IssueCounters>,
}

#[derive(Debug, Default)]
struct IssueCounters {
    analysis_issues: AtomicU64,
    entity_issues: AtomicU64,
}

impl IssueTracking {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of diagnostics logged so far.
    #[must_use]
    pub fn analysis_issues(&self) -> u64 {
        self.status.analysis_issues.load(Ordering::Relaxed)
    }

    /// Number of rule findings logged so far.
    #[must_use]
    pub fn entity_issues(&self) -> u64 {
        self.status.entity_issues.load(Ordering::Relaxed)
    }
}

impl ReportFactory for IssueTracking {
    fn common_report(&self) -> Arc<dyn CommonReport> {
        Arc::new(IssueSink(self.status.clone()))
    }

    fn entity_report(&self, _entity: &Arc<dyn SubjectEntity>) -> Arc<dyn EntityReport> {
        Arc::new(IssueSink(self.status.clone()))
    }
}

struct IssueSink(Arc<IssueCounters>);

impl CommonReport for IssueSink {
    fn log(&self, _level: ReportLevel, _message_id: &str, _args: &[NamedArg]) {
        self.0.analysis_issues.fetch_add(1, Ordering::Relaxed);
    }
}

impl EntityReport for IssueSink {
    fn rule_log(&self, _report: &ReportDescriptor, _args: &[NamedArg]) {
        self.0.entity_issues.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use valentine_core::entity::FileEntity;
    use valentine_core::report::ReportCategory;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressState>>);

    impl ProgressReport for Recorder {
        fn report_progress(&self, _entity: Option<&dyn SubjectEntity>, state: ProgressState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn counts_terminal_states_and_forwards_everything() {
        let inner = Arc::new(Recorder::default());
        let stats = ExtendedStatsProgress::new(Some(inner.clone()));
        for state in [
            ProgressState::LoadStarted,
            ProgressState::AnalysisCompleted,
            ProgressState::AnalysisCompleted,
            ProgressState::TargetSkippedFiltered,
            ProgressState::TargetSkippedUnsupported,
        ] {
            stats.report_progress(None, state);
        }

        assert_eq!(
            stats.stats(),
            AnalysisStats {
                analyzed: 2,
                skipped_unsupported: 1,
                skipped_filtered: 1,
            }
        );
        assert_eq!(inner.0.lock().unwrap().len(), 5);
    }

    #[test]
    fn issue_tracking_separates_diagnostics_from_findings() {
        let tracking = IssueTracking::new();
        let entity: Arc<dyn SubjectEntity> = Arc::new(FileEntity::new(PathBuf::from("a.exe"), 1));
        let report = tracking.entity_report(&entity);
        report.rule_log(
            &ReportDescriptor::new("PE019", ReportCategory::Security, ReportLevel::Critical),
            &[],
        );
        report.log(ReportLevel::Error, "entity_load_exception", &[]);
        tracking.common_report().log(ReportLevel::Critical, "generator_exception", &[]);

        assert_eq!(tracking.entity_issues(), 1);
        assert_eq!(tracking.analysis_issues(), 2);
    }
}
