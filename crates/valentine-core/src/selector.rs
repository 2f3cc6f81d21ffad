//! Filters deciding which reports are enabled.
//!
//! A [`RuleSelector`] performs a coarse check per report descriptor (level,
//! category, uid) that is cheap enough to run while building the list of
//! enabled rules. Per-uid [`ReportSelector`]s refine that decision with
//! regexes over report arguments; they are evaluated only when a rule
//! actually emits a report that already passed the coarse check.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::report::{NamedArg, ReportCategory, ReportDescriptor, ReportLevel};
use crate::{Aggregation, CoreError, CoreResult, SelectionMode};

// ---------------------------------------------------------------------------
// ReportSelector
// ---------------------------------------------------------------------------

/// Argument-level filter for a single report uid.
#[derive(Debug, Clone, Default)]
pub struct ReportSelector {
    arg_regexes: HashMap<String, Regex>,
    mode: SelectionMode,
    aggregation: Aggregation,
}

impl ReportSelector {
    /// Creates a filter without regexes, which enables everything.
    #[must_use]
    pub fn new(mode: SelectionMode, aggregation: Aggregation) -> Self {
        Self {
            arg_regexes: HashMap::new(),
            mode,
            aggregation,
        }
    }

    /// Sets the selection mode.
    pub fn set_mode(&mut self, mode: SelectionMode) {
        self.mode = mode;
    }

    /// Sets how regex matches are aggregated.
    pub fn set_aggregation(&mut self, aggregation: Aggregation) {
        self.aggregation = aggregation;
    }

    /// Adds (or replaces) the regex matched against argument `arg_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegex`] if `pattern` does not compile.
    pub fn add_regex(&mut self, arg_name: impl Into<String>, pattern: &str) -> CoreResult<()> {
        let regex = Regex::new(pattern).map_err(|source| CoreError::InvalidRegex {
            pattern: pattern.to_owned(),
            source,
        })?;
        self.arg_regexes.insert(arg_name.into(), regex);
        Ok(())
    }

    /// Decides whether a report with `args` is enabled.
    #[must_use]
    pub fn is_enabled(&self, args: &[NamedArg]) -> bool {
        if self.arg_regexes.is_empty() {
            return true;
        }

        let matches = match self.aggregation {
            Aggregation::Any => self.any_matches(args),
            Aggregation::All => self.all_match(args),
        };
        match self.mode {
            SelectionMode::IncludeSelected => matches,
            SelectionMode::ExcludeSelected => !matches,
        }
    }

    fn any_matches(&self, args: &[NamedArg]) -> bool {
        args.iter().any(|arg| {
            self.arg_regexes
                .get(arg.name)
                .is_some_and(|regex| regex.is_match(&arg.value.to_string()))
        })
    }

    fn all_match(&self, args: &[NamedArg]) -> bool {
        if args.len() < self.arg_regexes.len() {
            return false;
        }
        self.arg_regexes.iter().all(|(name, regex)| {
            args.iter()
                .find(|arg| arg.name == name.as_str())
                .is_some_and(|arg| regex.is_match(&arg.value.to_string()))
        })
    }
}

// ---------------------------------------------------------------------------
// RuleSelector
// ---------------------------------------------------------------------------

/// Decides which reports are enabled for an analysis scope.
#[derive(Debug, Clone, Default)]
pub struct RuleSelector {
    mode: SelectionMode,
    selected_uids: HashSet<String>,
    report_selectors: HashMap<String, ReportSelector>,
    excluded_levels: [bool; 4],
    excluded_categories: [bool; 5],
}

impl RuleSelector {
    /// Creates a selector enabling every report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the selection mode for [`add_selected_uid`](Self::add_selected_uid).
    pub fn set_mode(&mut self, mode: SelectionMode) {
        self.mode = mode;
    }

    /// The selection mode.
    #[must_use]
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Adds `uid` to the selected set. Returns `false` if it was already there.
    pub fn add_selected_uid(&mut self, uid: impl Into<String>) -> bool {
        self.selected_uids.insert(uid.into())
    }

    /// Excludes (or re-includes) every report of `level`. Returns the previous state.
    pub fn exclude_level(&mut self, level: ReportLevel, exclude: bool) -> bool {
        std::mem::replace(&mut self.excluded_levels[level.index()], exclude)
    }

    /// Excludes (or re-includes) every report of `category`. Returns the previous state.
    pub fn exclude_category(&mut self, category: ReportCategory, exclude: bool) -> bool {
        std::mem::replace(&mut self.excluded_categories[category.index()], exclude)
    }

    /// Returns `true` if reports of `level` are not excluded.
    #[must_use]
    pub fn is_level_enabled(&self, level: ReportLevel) -> bool {
        !self.excluded_levels[level.index()]
    }

    /// The argument filter of `uid`, created on first access.
    pub fn report_selector_mut(&mut self, uid: impl Into<String>) -> &mut ReportSelector {
        self.report_selectors.entry(uid.into()).or_default()
    }

    /// Coarse check: category, then level, then uid against the selected set.
    #[must_use]
    pub fn is_enabled(&self, report: &ReportDescriptor) -> bool {
        if self.excluded_categories[report.category.index()] {
            return false;
        }
        if self.excluded_levels[report.level.index()] {
            return false;
        }

        let selected = self.selected_uids.contains(report.uid);
        match self.mode {
            SelectionMode::IncludeSelected => selected,
            SelectionMode::ExcludeSelected => !selected,
        }
    }

    /// Full check: the coarse check, then the uid's argument filter if any.
    #[must_use]
    pub fn is_enabled_with_args(&self, report: &ReportDescriptor, args: &[NamedArg]) -> bool {
        if !self.is_enabled(report) {
            return false;
        }
        self.report_selectors
            .get(report.uid)
            .map_or(true, |selector| selector.is_enabled(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEP: ReportDescriptor =
        ReportDescriptor::new("PE019", ReportCategory::Security, ReportLevel::Critical);
    const ASLR: ReportDescriptor =
        ReportDescriptor::new("PE056", ReportCategory::Security, ReportLevel::Error);
    const VERSION: ReportDescriptor =
        ReportDescriptor::new("PE024", ReportCategory::Configuration, ReportLevel::Warning);

    #[test]
    fn default_selector_enables_everything() {
        let selector = RuleSelector::new();
        assert!(selector.is_enabled(&DEP));
        assert!(selector.is_enabled(&ASLR));
        assert!(selector.is_enabled(&VERSION));
    }

    #[test]
    fn exclude_selected_disables_exactly_the_named_uids() {
        let mut selector = RuleSelector::new();
        selector.add_selected_uid("PE019");
        assert!(!selector.is_enabled(&DEP));
        assert!(selector.is_enabled(&ASLR));
        assert!(selector.is_enabled(&VERSION));
    }

    #[test]
    fn include_selected_disables_everything_else() {
        let mut selector = RuleSelector::new();
        selector.set_mode(SelectionMode::IncludeSelected);
        selector.add_selected_uid("PE019");
        assert!(selector.is_enabled(&DEP));
        assert!(!selector.is_enabled(&ASLR));
        assert!(!selector.is_enabled(&VERSION));
    }

    #[test]
    fn excluded_level_wins_over_explicit_selection() {
        let mut selector = RuleSelector::new();
        selector.set_mode(SelectionMode::IncludeSelected);
        selector.add_selected_uid("PE019");
        assert!(!selector.exclude_level(ReportLevel::Critical, true));
        assert!(!selector.is_enabled(&DEP));
        assert!(!selector.is_level_enabled(ReportLevel::Critical));
    }

    #[test]
    fn excluded_category_disables_reports() {
        let mut selector = RuleSelector::new();
        selector.exclude_category(ReportCategory::Configuration, true);
        assert!(!selector.is_enabled(&VERSION));
        assert!(selector.is_enabled(&DEP));
        assert!(selector.exclude_category(ReportCategory::Configuration, false));
        assert!(selector.is_enabled(&VERSION));
    }

    #[test]
    fn arg_filter_any_exclude_suppresses_matching_values() {
        let mut selector = RuleSelector::new();
        let filter = selector.report_selector_mut("PE056");
        filter.add_regex("image_base", "^0x4").unwrap();

        let matching = [NamedArg::new("image_base", "0x400000")];
        let other = [NamedArg::new("image_base", "0x140000000")];
        assert!(!selector.is_enabled_with_args(&ASLR, &matching));
        assert!(selector.is_enabled_with_args(&ASLR, &other));
        // Reports without a filter are unaffected.
        assert!(selector.is_enabled_with_args(&DEP, &matching));
    }

    #[test]
    fn arg_filter_all_include_needs_every_arg() {
        let mut filter = ReportSelector::new(SelectionMode::IncludeSelected, Aggregation::All);
        filter.add_regex("section", "^\\.text$").unwrap();
        filter.add_regex("flags", "w").unwrap();

        assert!(filter.is_enabled(&[
            NamedArg::new("section", ".text"),
            NamedArg::new("flags", "rwx"),
        ]));
        assert!(!filter.is_enabled(&[NamedArg::new("section", ".text")]));
        assert!(!filter.is_enabled(&[
            NamedArg::new("section", ".data"),
            NamedArg::new("flags", "rwx"),
        ]));
        assert!(!filter.is_enabled(&[
            NamedArg::new("section", ".text"),
            NamedArg::new("other", "w"),
        ]));
    }

    #[test]
    fn arg_filter_never_overrides_coarse_exclusion() {
        let mut selector = RuleSelector::new();
        selector.add_selected_uid("PE056");
        selector
            .report_selector_mut("PE056")
            .add_regex("image_base", "nothing-matches")
            .unwrap();
        assert!(!selector.is_enabled_with_args(&ASLR, &[NamedArg::new("image_base", "0")]));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let mut filter = ReportSelector::default();
        let err = filter.add_regex("x", "(unclosed").unwrap_err();
        assert!(matches!(err, CoreError::InvalidRegex { ref pattern, .. } if pattern == "(unclosed"));
    }
}
