//! Progress bar driven by the engine's progress notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use valentine_core::entity::SubjectEntity;
use valentine_core::progress::{ProgressReport, ProgressState};

const TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {pos}/{len} {msg}";

/// Renders load and analysis progress with `indicatif`.
///
/// The number of targets is unknown up front, so the bar length grows by
/// one for every target whose loading starts.
pub struct ProgressBarReport {
    bar: ProgressBar,
    skipped: AtomicU64,
}

impl ProgressBarReport {
    /// Creates a bar drawing to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// Creates a report around `bar`; tests pass a hidden bar.
    #[must_use]
    pub fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            skipped: AtomicU64::new(0),
        }
    }

    /// Number of targets loaded so far.
    #[must_use]
    pub fn loaded(&self) -> u64 {
        self.bar.length().unwrap_or(0)
    }

    /// Number of targets that finished (analyzed or unsupported).
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.bar.position()
    }

    /// Removes the bar from the terminal.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn skip(&self) {
        let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        self.bar.set_message(format!("{skipped} skipped"));
    }
}

impl Default for ProgressBarReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReport for ProgressBarReport {
    fn report_progress(&self, entity: Option<&dyn SubjectEntity>, state: ProgressState) {
        match state {
            ProgressState::LoadStarted => self.bar.inc_length(1),
            ProgressState::AnalysisStarted => {
                if let Some(entity) = entity {
                    self.bar.set_message(entity.path().display().to_string());
                }
            }
            ProgressState::AnalysisCompleted => self.bar.inc(1),
            ProgressState::TargetSkippedUnsupported => {
                self.bar.inc(1);
                self.skip();
            }
            ProgressState::TargetSkippedFiltered => self.skip(),
            ProgressState::CombinedAnalysisStarted => self.bar.set_message("combined analysis"),
            ProgressState::CombinedAnalysisCompleted => self.bar.set_message("done"),
            ProgressState::Loaded => {}
        }
    }
}
