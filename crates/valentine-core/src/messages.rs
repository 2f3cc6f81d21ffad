//! Identifiers of the diagnostics the engine itself emits, and the names of
//! the arguments attached to them.

/// A generator failed; its tags are cached empty.
pub const GENERATOR_EXCEPTION: &str = "generator_exception";
/// A rule failed; the remaining rules still run.
pub const RULE_EXCEPTION: &str = "rule_exception";
/// A value was requested for which no generator is registered.
pub const NO_GENERATOR_FOR_TYPE: &str = "no_generator_for_type";
/// A value depends on itself through its generators.
pub const DEPENDENCY_CYCLE: &str = "dependency_cycle";
/// An entity could not be opened or inspected.
pub const INACCESSIBLE_ENTITY: &str = "inaccessible_entity";
/// The run as a whole failed.
pub const ANALYSIS_EXCEPTION: &str = "analysis_exception";
/// Format detection failed for an entity.
pub const ENTITY_LOAD_EXCEPTION: &str = "entity_load_exception";
/// Rule evaluation for an entity failed outside any single rule.
pub const ENTITY_PROCESSING_ERROR: &str = "entity_processing_error";
/// A directory could not be enumerated.
pub const TARGET_ENUMERATION_ERROR: &str = "target_enumeration_error";
/// A stop was requested by the user or an OS signal.
pub const EXPLICIT_STOP_REQUESTED: &str = "explicit_stop_requested";
/// An output report could not be written.
pub const WRITING_REPORT_ERROR: &str = "writing_report_error";
/// Summary emitted when a run finishes.
pub const ANALYSIS_FINISHED_MESSAGE: &str = "analysis_finished_message";
/// Summary emitted when a run was interrupted.
pub const ANALYSIS_INTERRUPTED_MESSAGE: &str = "analysis_interrupted_message";

/// Argument names.
pub mod arg {
    /// Failure description.
    pub const EXCEPTION: &str = "exception";
    /// Generator name.
    pub const GENERATOR_NAME: &str = "generator";
    /// Rule name.
    pub const RULE_NAME: &str = "rule";
    /// Value tag name.
    pub const TAG: &str = "tag";
    /// File system path.
    pub const PATH: &str = "path";
    /// Output format.
    pub const FORMAT: &str = "format";
    /// Number of analyzed targets.
    pub const ANALYZED: &str = "analyzed";
    /// Number of unsupported targets.
    pub const SKIPPED_UNSUPPORTED: &str = "skipped_unsupported";
    /// Number of filtered targets.
    pub const SKIPPED_FILTERED: &str = "skipped_filtered";
    /// Duration in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Number of rule findings.
    pub const ENTITY_ISSUES: &str = "entity_issues";
    /// Number of engine diagnostics.
    pub const ANALYSIS_ISSUES: &str = "analysis_issues";
}
