//! Valentine Analysis -- planning and concurrent execution of an analysis run.
//!
//! An [`AnalysisPlan`](plan::AnalysisPlan) names what to analyze and how. The
//! [`AnalysisPlanRunner`](runner::AnalysisPlanRunner) wires report sinks around
//! it and drives the [`ConcurrentExecutor`](executor::ConcurrentExecutor):
//!
//! 1. the I/O task enumerates targets and runs format detection;
//! 2. loaded targets are admitted to the CPU pool under a weight limit;
//! 3. CPU tasks run the enabled rules of every detected class;
//! 4. once every CPU task has finished, the combined phase runs once.

pub mod admission;
pub mod config;
pub mod context;
pub mod enumerator;
pub mod executor;
pub mod plan;
pub mod registry;
pub mod runner;
pub mod stats;

pub use config::{load_config, PlanConfig};
pub use plan::{AnalysisPlan, OutputSpec, PlanTarget, PreloadLimit, TargetFilter};
pub use registry::EngineRegistry;
pub use runner::{AnalysisPlanRunner, AnalysisSummary};

use valentine_core::CoreError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Top-level error type for the valentine-analysis crate.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The plan is inconsistent and cannot be run.
    #[error("invalid analysis plan: {0}")]
    Plan(String),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error raised by the engine core (registration, regexes, cycles).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread pool could not be started.
    #[error("failed to start {pool} runtime: {source}")]
    Runtime {
        /// Which pool failed.
        pool: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, AnalysisError>`.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
