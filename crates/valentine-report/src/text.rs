//! Plain text output.

use std::fmt::Write as _;

use valentine_core::report::ResourceProvider;

use crate::store::ReportSnapshot;
use crate::terminal::render_args;

/// Renders one line per report, run-level diagnostics first.
///
/// A finding whose uid has a description in `resources` gets it appended
/// after a dash.
#[must_use]
pub fn format_text(snapshot: &ReportSnapshot, resources: Option<&dyn ResourceProvider>) -> String {
    let mut out = String::new();
    for message in &snapshot.common {
        let _ = writeln!(
            out,
            "[{}] {} {}",
            message.level,
            message.message_id,
            render_args(&message.args)
        );
    }
    for entity in &snapshot.entities {
        let _ = writeln!(out, "{}", entity.path);
        for message in &entity.messages {
            let _ = writeln!(
                out,
                "  [{}] {} {}",
                message.level,
                message.message_id,
                render_args(&message.args)
            );
        }
        for finding in &entity.findings {
            let line = format!(
                "  [{}] {} ({}) {}",
                finding.level,
                finding.uid,
                finding.category,
                render_args(&finding.args)
            );
            let _ = match resources.and_then(|r| r.get_string(&finding.uid)) {
                Some(description) => writeln!(out, "{} - {description}", line.trim_end()),
                None => writeln!(out, "{line}"),
            };
        }
    }
    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use valentine_core::report::{NamedArg, ReportCategory, ReportLevel};

    use crate::store::{EntitySnapshot, StoredFinding, StoredMessage};

    #[test]
    fn entities_are_grouped_under_their_path() {
        let snapshot = ReportSnapshot {
            common: vec![StoredMessage {
                level: ReportLevel::Info,
                message_id: "analysis_finished_message".to_owned(),
                args: vec![NamedArg::new("analyzed", 2u32)],
            }],
            entities: vec![EntitySnapshot {
                path: "bin/app.exe".to_owned(),
                messages: Vec::new(),
                findings: vec![StoredFinding {
                    uid: "PE019".to_owned(),
                    category: ReportCategory::Security,
                    level: ReportLevel::Critical,
                    args: Vec::new(),
                }],
            }],
        };

        let text = format_text(&snapshot, None);
        assert_eq!(
            text,
            "[info] analysis_finished_message analyzed=2\nbin/app.exe\n  [critical] PE019 (security)"
        );

        let strings = HashMap::from([("PE019".to_owned(), "DEP is disabled".to_owned())]);
        let text = format_text(&snapshot, Some(&strings as &dyn ResourceProvider));
        assert!(text.ends_with("  [critical] PE019 (security) - DEP is disabled"));
    }
}
