//! Report descriptors, report arguments and the report sink contracts.
//!
//! The engine never formats or stores findings itself; it hands them to a
//! [`CommonReport`] (free-form diagnostics) or an [`EntityReport`] (findings
//! about one entity). Sinks are infallible from the engine's point of view:
//! an implementation that can fail must swallow its own errors.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::SubjectEntity;

// ---------------------------------------------------------------------------
// ReportLevel
// ---------------------------------------------------------------------------

/// Severity of a report, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    /// Advisory only.
    Info,
    /// Should be looked at.
    Warning,
    /// A real defect.
    Error,
    /// A severe defect, or an engine-level failure.
    Critical,
}

impl ReportLevel {
    /// Returns all levels in ascending order.
    #[must_use]
    pub const fn all() -> &'static [ReportLevel] {
        &[Self::Info, Self::Warning, Self::Error, Self::Critical]
    }

    /// Position of the level in [`all`](Self::all).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Error => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

impl FromStr for ReportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown report level '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ReportCategory
// ---------------------------------------------------------------------------

/// Domain a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportCategory {
    /// Engine and environment diagnostics.
    System,
    /// Size or speed improvements.
    Optimization,
    /// Exploit mitigations and other security properties.
    Security,
    /// Build and metadata configuration.
    Configuration,
    /// Structural format violations.
    Format,
}

impl ReportCategory {
    /// Returns all categories.
    #[must_use]
    pub const fn all() -> &'static [ReportCategory] {
        &[
            Self::System,
            Self::Optimization,
            Self::Security,
            Self::Configuration,
            Self::Format,
        ]
    }

    /// Position of the category in [`all`](Self::all).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::System => 0,
            Self::Optimization => 1,
            Self::Security => 2,
            Self::Configuration => 3,
            Self::Format => 4,
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::System => "system",
            Self::Optimization => "optimization",
            Self::Security => "security",
            Self::Configuration => "configuration",
            Self::Format => "format",
        };
        f.write_str(label)
    }
}

impl FromStr for ReportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "optimization" => Ok(Self::Optimization),
            "security" => Ok(Self::Security),
            "configuration" => Ok(Self::Configuration),
            "format" => Ok(Self::Format),
            other => Err(format!("unknown report category '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ReportDescriptor
// ---------------------------------------------------------------------------

/// Static description of one kind of finding a rule may emit.
///
/// The uid doubles as the key under which the human readable description is
/// looked up by output formatters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportDescriptor {
    /// Unique report id, e.g. `PE019`.
    pub uid: &'static str,
    /// Report category.
    pub category: ReportCategory,
    /// Report level.
    pub level: ReportLevel,
}

impl ReportDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(uid: &'static str, category: ReportCategory, level: ReportLevel) -> Self {
        Self {
            uid,
            category,
            level,
        }
    }
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Value of a named report argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for ArgValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<usize> for ArgValue {
    fn from(v: usize) -> Self {
        Self::UInt(v as u64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A named argument attached to a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedArg {
    /// Argument name, referenced by report descriptions and selector filters.
    pub name: &'static str,
    /// Argument value.
    pub value: ArgValue,
}

impl NamedArg {
    /// Creates a named argument.
    pub fn new(name: &'static str, value: impl Into<ArgValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sink contracts
// ---------------------------------------------------------------------------

/// Sink for free-form diagnostics (engine messages, per-entity failures).
pub trait CommonReport: Send + Sync {
    /// Records a message identified by `message_id`.
    fn log(&self, level: ReportLevel, message_id: &str, args: &[NamedArg]);
}

/// Sink for everything concerning one entity, rule findings included.
pub trait EntityReport: CommonReport {
    /// Records a rule finding.
    fn rule_log(&self, report: &ReportDescriptor, args: &[NamedArg]);
}

/// Creates the report sinks used by one analysis run.
pub trait ReportFactory: Send + Sync {
    /// The sink for run-level diagnostics.
    fn common_report(&self) -> Arc<dyn CommonReport>;

    /// A sink dedicated to `entity`.
    fn entity_report(&self, entity: &Arc<dyn SubjectEntity>) -> Arc<dyn EntityReport>;
}

/// Source of human readable strings keyed by report uid or message id.
///
/// Only output formatting consults it; the engine never does.
pub trait ResourceProvider: Send + Sync {
    /// The string stored under `key`, if any.
    fn get_string(&self, key: &str) -> Option<String>;
}

impl ResourceProvider for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}
