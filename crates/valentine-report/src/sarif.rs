//! SARIF v2.1.0 output.
//!
//! Every rule finding becomes a SARIF result located at the entity path.
//! Rule descriptors are deduplicated and sorted by uid; results keep the
//! snapshot order (entities by path, findings in emission order).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use valentine_core::report::{NamedArg, ReportLevel, ResourceProvider};

use crate::store::ReportSnapshot;
use crate::terminal::render_args;
use crate::{ReportResult, ENGINE_VERSION};

/// SARIF specification version.
const SARIF_VERSION: &str = "2.1.0";

/// SARIF JSON schema URL.
const SARIF_SCHEMA: &str = "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json";

/// Tool driver name.
const TOOL_NAME: &str = "Binary Valentine";

// ---------------------------------------------------------------------------
// SARIF structs
// ---------------------------------------------------------------------------

/// Top-level SARIF v2.1.0 report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifReport {
    /// SARIF version string, always `"2.1.0"`.
    pub version: String,
    /// JSON schema URL.
    #[serde(rename = "$schema")]
    pub schema: String,
    /// Tool runs; always exactly one.
    pub runs: Vec<SarifRun>,
}

/// A single tool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifRun {
    /// The tool that produced the results.
    pub tool: SarifTool,
    /// The findings.
    pub results: Vec<SarifResult>,
}

/// SARIF tool descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifTool {
    /// The primary tool component.
    pub driver: SarifToolComponent,
}

/// SARIF tool component with rules metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifToolComponent {
    /// Tool name.
    pub name: String,
    /// Tool version.
    pub version: String,
    /// Reports that produced at least one result.
    pub rules: Vec<SarifReportingDescriptor>,
}

/// A report descriptor in SARIF form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifReportingDescriptor {
    /// Report uid.
    pub id: String,
    /// Description looked up by uid, when one is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_description: Option<SarifMessage>,
    /// Default severity.
    pub default_configuration: SarifReportingConfiguration,
    /// Category of the report.
    pub properties: BTreeMap<String, String>,
}

/// Default configuration of a report descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifReportingConfiguration {
    /// SARIF level: `"error"`, `"warning"` or `"note"`.
    pub level: String,
}

/// One finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifResult {
    /// Report uid.
    pub rule_id: String,
    /// SARIF level.
    pub level: String,
    /// Message built from the report arguments.
    pub message: SarifMessage,
    /// Where the finding was made.
    pub locations: Vec<SarifLocation>,
    /// Report arguments, verbatim.
    pub properties: BTreeMap<String, String>,
}

/// A text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifMessage {
    /// The message text.
    pub text: String,
}

/// A location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifLocation {
    /// The physical location.
    pub physical_location: SarifPhysicalLocation,
}

/// A physical location; only the artifact is known for binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarifPhysicalLocation {
    /// The analyzed file.
    pub artifact_location: SarifArtifactLocation,
}

/// An artifact location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarifArtifactLocation {
    /// File path URI.
    pub uri: String,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Maps a report level to a SARIF level string.
fn level_to_sarif(level: ReportLevel) -> &'static str {
    match level {
        ReportLevel::Critical | ReportLevel::Error => "error",
        ReportLevel::Warning => "warning",
        ReportLevel::Info => "note",
    }
}

fn args_to_properties(args: &[NamedArg]) -> BTreeMap<String, String> {
    args.iter()
        .map(|arg| (arg.name.to_owned(), arg.value.to_string()))
        .collect()
}

/// Builds the SARIF document for `snapshot`; rule descriptions come from
/// `resources` when given.
#[must_use]
pub fn build_sarif(snapshot: &ReportSnapshot, resources: Option<&dyn ResourceProvider>) -> SarifReport {
    let mut rules = BTreeMap::new();
    let mut results = Vec::new();

    for entity in &snapshot.entities {
        for finding in &entity.findings {
            rules.entry(finding.uid.clone()).or_insert_with(|| SarifReportingDescriptor {
                id: finding.uid.clone(),
                short_description: resources
                    .and_then(|r| r.get_string(&finding.uid))
                    .map(|text| SarifMessage { text }),
                default_configuration: SarifReportingConfiguration {
                    level: level_to_sarif(finding.level).to_owned(),
                },
                properties: BTreeMap::from([(
                    "category".to_owned(),
                    finding.category.to_string(),
                )]),
            });

            let args = render_args(&finding.args);
            let text = if args.is_empty() {
                finding.uid.clone()
            } else {
                format!("{}: {args}", finding.uid)
            };
            results.push(SarifResult {
                rule_id: finding.uid.clone(),
                level: level_to_sarif(finding.level).to_owned(),
                message: SarifMessage { text },
                locations: vec![SarifLocation {
                    physical_location: SarifPhysicalLocation {
                        artifact_location: SarifArtifactLocation {
                            uri: entity.path.clone(),
                        },
                    },
                }],
                properties: args_to_properties(&finding.args),
            });
        }
    }

    SarifReport {
        version: SARIF_VERSION.to_owned(),
        schema: SARIF_SCHEMA.to_owned(),
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifToolComponent {
                    name: TOOL_NAME.to_owned(),
                    version: ENGINE_VERSION.to_owned(),
                    rules: rules.into_values().collect(),
                },
            },
            results,
        }],
    }
}

/// Renders `snapshot` as pretty-printed SARIF.
///
/// # Errors
///
/// Returns [`crate::ReportError::Serialization`] if serialization fails.
pub fn format_sarif(
    snapshot: &ReportSnapshot,
    resources: Option<&dyn ResourceProvider>,
) -> ReportResult<String> {
    Ok(serde_json::to_string_pretty(&build_sarif(snapshot, resources))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use valentine_core::report::ReportCategory;

    use crate::store::{EntitySnapshot, StoredFinding};

    fn snapshot() -> ReportSnapshot {
        let finding = |uid: &str, level| StoredFinding {
            uid: uid.to_owned(),
            category: ReportCategory::Security,
            level,
            args: Vec::new(),
        };
        ReportSnapshot {
            common: Vec::new(),
            entities: vec![
                EntitySnapshot {
                    path: "a.exe".to_owned(),
                    messages: Vec::new(),
                    findings: vec![finding("PE056", ReportLevel::Error)],
                },
                EntitySnapshot {
                    path: "b.exe".to_owned(),
                    messages: Vec::new(),
                    findings: vec![
                        finding("PE019", ReportLevel::Critical),
                        finding("PE056", ReportLevel::Error),
                    ],
                },
            ],
        }
    }

    #[test]
    fn rules_are_deduplicated_and_sorted() {
        let report = build_sarif(&snapshot(), None);
        let ids: Vec<_> = report.runs[0]
            .tool
            .driver
            .rules
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["PE019", "PE056"]);
        assert_eq!(report.runs[0].results.len(), 3);
    }

    #[test]
    fn results_point_at_entity_paths() {
        let report = build_sarif(&snapshot(), None);
        let result = &report.runs[0].results[1];
        assert_eq!(result.rule_id, "PE019");
        assert_eq!(result.level, "error");
        assert_eq!(result.locations[0].physical_location.artifact_location.uri, "b.exe");
    }

    #[test]
    fn output_is_valid_sarif_json() {
        let json = format_sarif(&snapshot(), None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], "2.1.0");
        assert!(value["runs"][0]["tool"]["driver"]["rules"][0]
            .get("shortDescription")
            .is_none());
        assert!(value["$schema"].as_str().unwrap().contains("sarif-schema-2.1.0"));
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], TOOL_NAME);
    }

    #[test]
    fn known_uids_get_a_short_description() {
        let strings =
            std::collections::HashMap::from([("PE019".to_owned(), "DEP is disabled".to_owned())]);
        let report = build_sarif(&snapshot(), Some(&strings as &dyn ResourceProvider));
        let rules = &report.runs[0].tool.driver.rules;
        assert_eq!(
            rules[0].short_description.as_ref().map(|m| m.text.as_str()),
            Some("DEP is disabled")
        );
        assert!(rules[1].short_description.is_none());
    }
}
