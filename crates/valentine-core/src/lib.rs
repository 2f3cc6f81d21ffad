//! Valentine Core -- value model, providers, rules and selectors of the analysis engine.
//!
//! This crate holds everything the engine needs to evaluate rules against a
//! single entity (and, in the second phase, against a group of entities):
//!
//! - [`value`] and [`cache`]: typed, lazily computed facts and their per-entity store.
//! - [`generator`], [`provider`], [`shared`], [`combined`]: producers of values and
//!   the providers that run them on demand with failure isolation.
//! - [`rule`], [`rule_list`], [`selector`]: the rule contract, the registry and the
//!   filters deciding which reports are enabled.
//! - [`dependency`]: the closure of values the combined phase needs.
//! - [`report`], [`progress`], [`entity`], [`detector`]: contracts towards the
//!   outside world (report sinks, progress sinks, subjects, format detection).

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod combined;
pub mod dependency;
pub mod detector;
pub mod entity;
pub mod generator;
pub mod messages;
pub mod progress;
pub mod provider;
pub mod report;
pub mod rule;
pub mod rule_list;
pub mod selector;
pub mod shared;
pub mod time;
pub mod value;

mod failure;

#[cfg(test)]
pub(crate) mod test_support;

pub use failure::panic_message;
pub use report::{ReportCategory, ReportLevel};
pub use value::{Dependency, DependencyValues, Value, ValueTag};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Boxed error returned by generators, rules and format detectors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the valentine-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Two registered rules declare the same report uid.
    #[error("duplicate report uid '{uid}' (rule '{rule}')")]
    DuplicateReportUid {
        /// The offending uid.
        uid: String,
        /// Name of the rule registered second.
        rule: String,
    },

    /// Two generators in the same list produce the same value tag.
    #[error("value tag '{tag}' is produced by more than one generator (second: '{generator}')")]
    DuplicateGeneratorTag {
        /// The offending tag.
        tag: ValueTag,
        /// Name of the generator registered second.
        generator: String,
    },

    /// The combined generator graph contains a cycle.
    #[error("dependency cycle between combined values: {}", format_cycle(.0))]
    DependencyCycle(Vec<ValueTag>),

    /// A user supplied regular expression failed to compile.
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        /// The regex text as supplied.
        pattern: String,
        /// Underlying compile error.
        #[source]
        source: regex::Error,
    },

    /// Tracing/logging initialization failed.
    #[error("tracing initialization error: {0}")]
    TracingInit(String),
}

/// Convenience alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

fn format_cycle(tags: &[ValueTag]) -> String {
    tags.iter()
        .map(|tag| tag.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// Tracing / Logging
// ---------------------------------------------------------------------------

/// Installs the global tracing subscriber.
///
/// `verbose` selects DEBUG, `quiet` selects ERROR and the default is INFO.
/// `json_output` switches from compact human-readable lines to JSON lines.
///
/// `RUST_LOG`, when set, takes precedence over the programmatic level.
///
/// # Errors
///
/// Returns [`CoreError::TracingInit`] if the global subscriber has already been set.
pub fn init_tracing(verbose: bool, quiet: bool, json_output: bool) -> Result<(), CoreError> {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    } else {
        fmt()
            .compact()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| CoreError::TracingInit(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RuleClass
// ---------------------------------------------------------------------------

/// Index of a detected format variant gating which rules may run on an entity.
///
/// Format crates declare their classes as constants, e.g.
/// `pub const PE: RuleClass = RuleClass::new(0);`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleClass(u8);

impl RuleClass {
    /// Largest number of distinct rule classes.
    pub const MAX: usize = 64;

    /// Creates a rule class from its index.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a `const`) if `index >= 64`.
    #[must_use]
    pub const fn new(index: u8) -> Self {
        assert!((index as usize) < Self::MAX, "rule class index out of range");
        Self(index)
    }

    /// Returns the index of this class.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RuleClassMask
// ---------------------------------------------------------------------------

/// Set of rule classes detected for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RuleClassMask(u64);

impl RuleClassMask {
    /// An empty mask.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// A mask holding every class.
    #[must_use]
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// Adds `class` to the mask.
    pub fn set(&mut self, class: RuleClass) {
        self.0 |= 1u64 << class.index();
    }

    /// Returns a copy of the mask with `class` added.
    #[must_use]
    pub const fn with(self, class: RuleClass) -> Self {
        Self(self.0 | (1u64 << class.index()))
    }

    /// Returns `true` if `class` is in the mask.
    #[must_use]
    pub const fn is_set(self, class: RuleClass) -> bool {
        self.0 & (1u64 << class.index()) != 0
    }

    /// Returns `true` if no class is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the two masks share a class.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Iterates over the set classes in ascending index order.
    pub fn iter(self) -> impl Iterator<Item = RuleClass> {
        let mut remaining = self.0;
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let index = remaining.trailing_zeros();
            remaining &= remaining - 1;
            #[allow(clippy::cast_possible_truncation)]
            Some(RuleClass(index as u8))
        })
    }
}

impl FromIterator<RuleClass> for RuleClassMask {
    fn from_iter<I: IntoIterator<Item = RuleClass>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for class in iter {
            mask.set(class);
        }
        mask
    }
}

// ---------------------------------------------------------------------------
// Selection enums shared by config and selectors
// ---------------------------------------------------------------------------

/// Whether a selector lists the reports to keep or the reports to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Only the selected reports are enabled.
    IncludeSelected,
    /// Every report except the selected ones is enabled.
    #[default]
    ExcludeSelected,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IncludeSelected => "include_selected",
            Self::ExcludeSelected => "exclude_selected",
        })
    }
}

/// How per-argument regex filters of a report are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// The filter matches if any configured argument matches.
    #[default]
    Any,
    /// The filter matches only if every configured argument is present and matches.
    All,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
