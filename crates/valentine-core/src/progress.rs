//! Progress notifications.

use std::fmt;

use serde::Serialize;

use crate::entity::SubjectEntity;

/// Stage reached by an entity (or, for the combined stages, by the run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Loading and format detection started.
    LoadStarted,
    /// The entity is loaded and queued for rule evaluation.
    Loaded,
    /// Rule evaluation started.
    AnalysisStarted,
    /// Rule evaluation finished.
    AnalysisCompleted,
    /// The cross-entity phase started.
    CombinedAnalysisStarted,
    /// The cross-entity phase finished.
    CombinedAnalysisCompleted,
    /// No rule class was detected for the entity.
    TargetSkippedUnsupported,
    /// The entity path was excluded by a target filter.
    TargetSkippedFiltered,
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::LoadStarted => "load_started",
            Self::Loaded => "loaded",
            Self::AnalysisStarted => "analysis_started",
            Self::AnalysisCompleted => "analysis_completed",
            Self::CombinedAnalysisStarted => "combined_analysis_started",
            Self::CombinedAnalysisCompleted => "combined_analysis_completed",
            Self::TargetSkippedUnsupported => "target_skipped_unsupported",
            Self::TargetSkippedFiltered => "target_skipped_filtered",
        };
        f.write_str(label)
    }
}

/// Receiver of progress notifications. Called concurrently from every pool.
pub trait ProgressReport: Send + Sync {
    /// `entity` is `None` for run-level states.
    fn report_progress(&self, entity: Option<&dyn SubjectEntity>, state: ProgressState);
}
