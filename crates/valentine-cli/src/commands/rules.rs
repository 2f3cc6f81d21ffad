//! The `rules` CLI subcommand -- lists the registered rules and their reports.

use std::fmt::Write as _;

use anyhow::Context;

use valentine_analysis::EngineRegistry;
use valentine_core::report::{ReportDescriptor, ResourceProvider};
use valentine_core::RuleClass;

use crate::ExitCode;

/// List the registered rules and their reports.
#[derive(Debug, Default, clap::Args)]
pub struct RulesArgs {
    /// Print only the report uids, one per line.
    #[arg(long)]
    pub uids: bool,
}

/// Executes the `rules` subcommand.
pub fn execute(args: &RulesArgs) -> Result<ExitCode, anyhow::Error> {
    let registry = valentine_pe::engine_registry().context("failed to register built-in rules")?;
    let listing = if args.uids {
        list_uids(&registry)
    } else {
        list_rules(&registry)
    };
    print!("{listing}");
    Ok(ExitCode::Pass)
}

fn class_name(class: RuleClass) -> String {
    valentine_pe::rule_class_name(class).map_or_else(|| class.to_string(), str::to_string)
}

fn push_reports(out: &mut String, reports: &[ReportDescriptor], titles: &dyn ResourceProvider) {
    for report in reports {
        let level = report.level.to_string();
        let category = report.category.to_string();
        let title = titles.get_string(report.uid).unwrap_or_default();
        let line = format!("    {:<8} {level:<9} {category:<13} {title}", report.uid);
        let _ = writeln!(out, "{}", line.trim_end());
    }
}

fn list_rules(registry: &EngineRegistry) -> String {
    let rules = registry.rules();
    let titles = valentine_pe::report_titles();
    let mut out = String::new();
    for rule in rules.get_all_rules() {
        let _ = writeln!(out, "{} [{}]", rule.name(), class_name(rule.rule_class()));
        push_reports(&mut out, rule.reports(), &titles);
    }
    for rule in rules.get_all_combined_rules() {
        let _ = writeln!(out, "{} [{}, combined]", rule.name(), class_name(rule.rule_class()));
        push_reports(&mut out, rule.reports(), &titles);
    }
    let _ = writeln!(out, "{} reports registered", rules.report_count());
    out
}

fn list_uids(registry: &EngineRegistry) -> String {
    let rules = registry.rules();
    let mut uids: Vec<&str> = rules
        .get_all_rules()
        .flat_map(|rule| rule.reports().iter().map(|report| report.uid))
        .chain(
            rules
                .get_all_combined_rules()
                .flat_map(|rule| rule.reports().iter().map(|report| report.uid)),
        )
        .collect();
    uids.sort_unstable();
    uids.iter().fold(String::new(), |mut out, uid| {
        let _ = writeln!(out, "{uid}");
        out
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_names_rules_classes_and_reports() {
        let registry = valentine_pe::engine_registry().unwrap();
        let listing = list_rules(&registry);
        assert!(listing.contains("pe_simple_flags_rule [pe]"));
        assert!(listing.contains("PE019"));
        assert!(listing.contains("    PE019    critical  security      DEP disabled\n"));
        assert!(listing.ends_with("5 reports registered\n"));
    }

    #[test]
    fn uid_listing_is_sorted() {
        let registry = valentine_pe::engine_registry().unwrap();
        assert_eq!(list_uids(&registry), "PE016\nPE018\nPE019\nPE056\nPE057\n");
    }

    #[test]
    fn execute_succeeds() {
        assert_eq!(execute(&RulesArgs::default()).unwrap(), ExitCode::Pass);
    }
}
