//! Valentine CLI -- command-line interface of the Binary Valentine engine.
//!
//! This crate provides the `valentine` entry point, argument parsing, exit
//! code definitions and the progress bar shown while an analysis runs.

use std::fmt;

use valentine_analysis::AnalysisSummary;

pub mod commands;
pub mod progress;

// ---------------------------------------------------------------------------
// Exit Codes
// ---------------------------------------------------------------------------

/// Valentine process exit codes.
///
/// Scripts can tell a clean binary set from one with findings, or from a run
/// that never finished, by the status alone.
///
/// | Code | Meaning                                        |
/// |------|------------------------------------------------|
/// | 0    | Analysis completed without findings            |
/// | 1    | Analysis completed, rules reported findings    |
/// | 2    | Engine error (failed generator, I/O, internal) |
/// | 4    | Configuration error                            |
/// | 5    | Analysis interrupted                           |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitCode {
    /// Analysis completed without findings.
    Pass = 0,
    /// Analysis completed, rules reported findings.
    IssuesFound = 1,
    /// Engine error (failed generator, unreadable target, internal error).
    EngineError = 2,
    /// Configuration error (invalid YAML, bad regex, conflicting limits).
    ConfigError = 4,
    /// The analysis was stopped before it completed.
    Interrupted = 5,
}

impl ExitCode {
    /// Returns the numeric exit code as a `u8`.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns all exit code variants.
    #[must_use]
    pub const fn all() -> &'static [ExitCode] {
        &[
            Self::Pass,
            Self::IssuesFound,
            Self::EngineError,
            Self::ConfigError,
            Self::Interrupted,
        ]
    }

    /// Returns a human-readable description of this exit code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Pass => "analysis completed without findings",
            Self::IssuesFound => "analysis completed, issues found",
            Self::EngineError => "engine error (failed generator, I/O, internal error)",
            Self::ConfigError => "configuration error (invalid YAML, bad regex, conflicting limits)",
            Self::Interrupted => "analysis interrupted",
        }
    }

    /// Maps the outcome of a run to an exit code.
    ///
    /// An interrupted run wins over everything else; engine diagnostics win
    /// over rule findings.
    #[must_use]
    pub fn for_summary(summary: &AnalysisSummary) -> Self {
        if summary.interrupted {
            Self::Interrupted
        } else if summary.analysis_issues > 0 {
            Self::EngineError
        } else if summary.entity_issues > 0 {
            Self::IssuesFound
        } else {
            Self::Pass
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {} ({})", self.as_u8(), self.description())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}

/// Terminate the process with the given [`ExitCode`].
///
/// Logs the exit reason (info for [`ExitCode::Pass`] and
/// [`ExitCode::IssuesFound`], error for everything else) and returns the
/// corresponding [`std::process::ExitCode`] suitable for use as a `main`
/// return value.
///
/// # Example
///
/// ```rust,no_run
/// use valentine_cli::ExitCode;
///
/// fn main() -> std::process::ExitCode {
///     // ... run analysis ...
///     valentine_cli::terminate(ExitCode::Pass)
/// }
/// ```
pub fn terminate(code: ExitCode) -> std::process::ExitCode {
    match code {
        ExitCode::Pass | ExitCode::IssuesFound => {
            tracing::info!(%code, "valentine exiting");
        }
        _ => {
            tracing::error!(%code, "valentine exiting with error");
        }
    }
    code.into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
