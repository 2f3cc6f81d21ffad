//! Wall-clock and monotonic timing of an analysis run.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Records when a run started and stopped, and whether it was interrupted.
#[derive(Debug, Default)]
pub struct TimeTracker {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    steady_start: Option<Instant>,
    duration: Duration,
    interrupted: bool,
}

impl TimeTracker {
    /// Creates a tracker that has not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking. Has no effect while already running.
    pub fn start(&mut self) {
        if self.steady_start.is_some() {
            return;
        }
        self.start = Some(Utc::now());
        self.end = None;
        self.steady_start = Some(Instant::now());
    }

    /// Stops tracking. Has no effect unless running.
    pub fn stop(&mut self, interrupted: bool) {
        let Some(steady_start) = self.steady_start.take() else {
            return;
        };
        self.interrupted = interrupted;
        self.end = Some(Utc::now());
        // Millisecond resolution, matching what reports display.
        self.duration = Duration::from_millis(
            u64::try_from(steady_start.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
    }

    /// Wall-clock start time.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    /// Wall-clock end time.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// Monotonic duration of the last completed run.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether the last completed run was interrupted.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_start_is_ignored() {
        let mut tracker = TimeTracker::new();
        tracker.stop(true);
        assert!(tracker.start_time().is_none());
        assert!(tracker.end_time().is_none());
        assert!(!tracker.is_interrupted());
    }

    #[test]
    fn records_start_end_and_interruption() {
        let mut tracker = TimeTracker::new();
        tracker.start();
        let first_start = tracker.start_time();
        tracker.start();
        assert_eq!(tracker.start_time(), first_start);

        std::thread::sleep(Duration::from_millis(5));
        tracker.stop(true);

        let (start, end) = (tracker.start_time().unwrap(), tracker.end_time().unwrap());
        assert!(end >= start);
        assert!(tracker.duration() >= Duration::from_millis(5));
        assert!(tracker.is_interrupted());
    }
}
