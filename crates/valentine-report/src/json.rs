//! Structured JSON output.
//!
//! The document carries a schema version, the engine version, summary counts
//! and the snapshot itself. Entities arrive sorted by path, so the output is
//! deterministic apart from the optional timestamp.

use std::collections::BTreeMap;

use serde::Serialize;

use valentine_core::ReportLevel;

use crate::store::{EntitySnapshot, ReportSnapshot, StoredMessage};
use crate::{ReportResult, ENGINE_VERSION};

/// Current schema version of the JSON output.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Top-level JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport<'a> {
    /// Schema version identifier.
    pub schema_version: &'static str,
    /// Version of the engine that produced the report.
    pub engine_version: &'static str,
    /// RFC 3339 generation time, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    /// Summary counts.
    pub summary: JsonSummary,
    /// Run-level diagnostics.
    pub messages: &'a [StoredMessage],
    /// Per-entity reports.
    pub entities: &'a [EntitySnapshot],
}

/// Counts of findings per level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JsonSummary {
    /// Entities with at least one report.
    pub entities: usize,
    /// Total findings.
    pub findings: usize,
    /// Total diagnostics.
    pub messages: usize,
    /// Findings per level.
    pub by_level: BTreeMap<ReportLevel, usize>,
}

/// Computes the summary counts of `snapshot`.
#[must_use]
pub fn compute_summary(snapshot: &ReportSnapshot) -> JsonSummary {
    let mut by_level = BTreeMap::new();
    for finding in snapshot.entities.iter().flat_map(|e| e.findings.iter()) {
        *by_level.entry(finding.level).or_insert(0) += 1;
    }
    JsonSummary {
        entities: snapshot.entities.len(),
        findings: snapshot.finding_count(),
        messages: snapshot.message_count(),
        by_level,
    }
}

/// Renders `snapshot` as pretty-printed JSON without a timestamp.
///
/// # Errors
///
/// Returns [`crate::ReportError::Serialization`] if serialization fails.
pub fn format_json(snapshot: &ReportSnapshot) -> ReportResult<String> {
    format_json_with_timestamp(snapshot, false)
}

/// Renders `snapshot` as pretty-printed JSON, optionally stamping the
/// current UTC time.
///
/// # Errors
///
/// Returns [`crate::ReportError::Serialization`] if serialization fails.
pub fn format_json_with_timestamp(
    snapshot: &ReportSnapshot,
    include_timestamp: bool,
) -> ReportResult<String> {
    let report = JsonReport {
        schema_version: SCHEMA_VERSION,
        engine_version: ENGINE_VERSION,
        generated_at: include_timestamp.then(|| chrono::Utc::now().to_rfc3339()),
        summary: compute_summary(snapshot),
        messages: &snapshot.common,
        entities: &snapshot.entities,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use valentine_core::report::{NamedArg, ReportCategory};

    use crate::store::StoredFinding;

    fn finding(uid: &str, level: ReportLevel) -> StoredFinding {
        StoredFinding {
            uid: uid.to_owned(),
            category: ReportCategory::Security,
            level,
            args: vec![NamedArg::new("image_base", "0x400000")],
        }
    }

    fn snapshot() -> ReportSnapshot {
        ReportSnapshot {
            common: Vec::new(),
            entities: vec![EntitySnapshot {
                path: "a.exe".to_owned(),
                messages: Vec::new(),
                findings: vec![
                    finding("PE019", ReportLevel::Critical),
                    finding("PE056", ReportLevel::Error),
                    finding("PE057", ReportLevel::Error),
                ],
            }],
        }
    }

    #[test]
    fn summary_counts_findings_per_level() {
        let summary = compute_summary(&snapshot());
        assert_eq!(summary.findings, 3);
        assert_eq!(summary.by_level.get(&ReportLevel::Error), Some(&2));
        assert_eq!(summary.by_level.get(&ReportLevel::Critical), Some(&1));
        assert!(!summary.by_level.contains_key(&ReportLevel::Info));
    }

    #[test]
    fn json_is_deterministic_without_timestamp() {
        let first = format_json(&snapshot()).unwrap();
        assert_eq!(first, format_json(&snapshot()).unwrap());

        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert!(value.get("generated_at").is_none());
        assert_eq!(value["summary"]["by_level"]["error"], 2);
        assert_eq!(value["entities"][0]["findings"][0]["args"][0]["value"], "0x400000");
    }

    #[test]
    fn timestamp_is_included_on_request() {
        let json = format_json_with_timestamp(&snapshot(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["generated_at"].is_string());
    }
}
