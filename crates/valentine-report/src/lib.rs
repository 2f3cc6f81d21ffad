//! Valentine Report -- report sinks and output writers.
//!
//! The engine talks to report sinks only through the contracts in
//! `valentine_core::report`. This crate provides the sinks used by the CLI:
//!
//! - [`store`]: an in-memory, buffered store of everything reported during a run.
//! - [`fanout`]: a factory forwarding every report to several factories.
//! - [`terminal`]: renders reports as `tracing` events while the run progresses.
//! - [`text`], [`json`], [`sarif`]: writers persisting a [`ReportSnapshot`] to disk.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use valentine_core::report::ResourceProvider;

pub mod fanout;
pub mod json;
pub mod sarif;
pub mod store;
pub mod terminal;
pub mod text;

pub use store::{InMemoryCommonReport, InMemoryReport, ReportSnapshot};

/// Engine version extracted from this crate's Cargo.toml.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while writing output reports.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Creating or writing the output file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the report failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `Result<T, ReportError>`.
pub type ReportResult<T> = Result<T, ReportError>;

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Format of a persisted output report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text, one line per report.
    Text,
    /// Structured JSON.
    Json,
    /// SARIF v2.1.0.
    Sarif,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Sarif => "sarif",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "sarif" => Ok(Self::Sarif),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Renders `snapshot` in `format`. Text and SARIF output take report
/// descriptions from `resources`.
///
/// # Errors
///
/// Returns [`ReportError::Serialization`] if a structured format fails to serialize.
pub fn format_output(
    format: OutputFormat,
    snapshot: &ReportSnapshot,
    resources: Option<&dyn ResourceProvider>,
) -> ReportResult<String> {
    match format {
        OutputFormat::Text => Ok(text::format_text(snapshot, resources)),
        OutputFormat::Json => json::format_json(snapshot),
        OutputFormat::Sarif => sarif::format_sarif(snapshot, resources),
    }
}

/// Renders `snapshot` in `format` and writes it to `path`, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns [`ReportError`] if rendering or writing fails.
pub fn write_output(
    format: OutputFormat,
    snapshot: &ReportSnapshot,
    path: &Path,
    resources: Option<&dyn ResourceProvider>,
) -> ReportResult<()> {
    let content = format_output(format, snapshot, resources)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    debug!(path = %path.display(), %format, "output report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parses_aliases() {
        assert_eq!("TXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!(" sarif".parse::<OutputFormat>(), Ok(OutputFormat::Sarif));
        assert!("html".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn write_output_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/out/report.json");
        write_output(OutputFormat::Json, &ReportSnapshot::default(), &path, None).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"schema_version\""));
    }
}
