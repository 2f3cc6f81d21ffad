//! Registry of rules per rule class.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::combined::CombinedValueProvider;
use crate::messages::{self, arg};
use crate::provider::AsyncValueProvider;
use crate::report::{CommonReport, NamedArg, ReportDescriptor, ReportLevel};
use crate::rule::{run_combined_rule, run_rule, CombinedRule, Rule, RuleOutcome};
use crate::selector::RuleSelector;
use crate::{CoreError, CoreResult, RuleClass};

/// Rules and combined rules, keyed by rule class.
///
/// Report uids are unique across the whole list. The list is filled before a
/// run starts and read-only afterwards.
#[derive(Default)]
pub struct RuleList {
    rules: BTreeMap<RuleClass, Vec<Arc<dyn Rule>>>,
    combined: BTreeMap<RuleClass, Vec<Arc<dyn CombinedRule>>>,
    // uid -> (descriptor, owning rule name)
    reports: HashMap<&'static str, (ReportDescriptor, String)>,
}

impl RuleList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a per-entity rule.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateReportUid`] if one of its reports is
    /// already registered. The list is left unchanged.
    pub fn register(&mut self, rule: Arc<dyn Rule>) -> CoreResult<()> {
        self.claim_reports(rule.name(), rule.reports())?;
        self.rules.entry(rule.rule_class()).or_default().push(rule);
        Ok(())
    }

    /// Registers a combined rule.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateReportUid`] if one of its reports is
    /// already registered. The list is left unchanged.
    pub fn register_combined(&mut self, rule: Arc<dyn CombinedRule>) -> CoreResult<()> {
        self.claim_reports(rule.name(), rule.reports())?;
        self.combined.entry(rule.rule_class()).or_default().push(rule);
        Ok(())
    }

    fn claim_reports(&mut self, rule: &str, reports: &[ReportDescriptor]) -> CoreResult<()> {
        for (i, report) in reports.iter().enumerate() {
            let declared_twice = reports[..i].iter().any(|r| r.uid == report.uid);
            if declared_twice || self.reports.contains_key(report.uid) {
                return Err(CoreError::DuplicateReportUid {
                    uid: report.uid.to_owned(),
                    rule: rule.to_owned(),
                });
            }
        }
        for report in reports {
            self.reports.insert(report.uid, (*report, rule.to_owned()));
        }
        Ok(())
    }

    /// Rules of `class` with at least one report enabled by `selector`.
    #[must_use]
    pub fn get_enabled_rules(&self, class: RuleClass, selector: &RuleSelector) -> EnabledRuleList {
        let rules = self
            .rules
            .get(&class)
            .into_iter()
            .flatten()
            .filter(|rule| rule.reports().iter().any(|r| selector.is_enabled(r)))
            .cloned()
            .collect();
        EnabledRuleList { rules }
    }

    /// Combined rules of `class` that apply to at least one of `selectors`.
    #[must_use]
    pub fn get_enabled_combined_rules(
        &self,
        class: RuleClass,
        selectors: &[&RuleSelector],
    ) -> EnabledCombinedRuleList {
        let rules = self
            .combined
            .get(&class)
            .into_iter()
            .flatten()
            .filter(|rule| selectors.iter().any(|s| rule.applies_to(s)))
            .cloned()
            .collect();
        EnabledCombinedRuleList { rules }
    }

    /// Resolves `uid` to the registered, statically allocated uid.
    #[must_use]
    pub fn get_report_uid(&self, uid: &str) -> Option<&'static str> {
        self.reports.get(uid).map(|(report, _)| report.uid)
    }

    /// Returns the descriptor registered for `uid`.
    #[must_use]
    pub fn get_report(&self, uid: &str) -> Option<ReportDescriptor> {
        self.reports.get(uid).map(|(report, _)| *report)
    }

    /// Rule classes that have at least one combined rule.
    pub fn combined_rule_classes(&self) -> impl Iterator<Item = RuleClass> + '_ {
        self.combined.keys().copied()
    }

    /// Every registered per-entity rule, grouped by class in ascending order.
    pub fn get_all_rules(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.values().flatten()
    }

    /// Every registered combined rule, grouped by class in ascending order.
    pub fn get_all_combined_rules(&self) -> impl Iterator<Item = &Arc<dyn CombinedRule>> {
        self.combined.values().flatten()
    }

    /// Number of registered reports.
    #[must_use]
    pub fn report_count(&self) -> usize {
        self.reports.len()
    }
}

// ---------------------------------------------------------------------------
// Enabled lists
// ---------------------------------------------------------------------------

/// Per-entity rules selected for one class and one selector.
#[derive(Clone, Default)]
pub struct EnabledRuleList {
    rules: Vec<Arc<dyn Rule>>,
}

impl EnabledRuleList {
    /// Number of enabled rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rule is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule against the entity behind `provider`.
    ///
    /// A failing rule is reported as `rule_exception` and the next rule runs.
    /// `stop` is checked between rules; a started rule always finishes.
    /// Returns `false` if the list was cut short by `stop`.
    pub async fn run(
        &self,
        provider: &mut AsyncValueProvider,
        selector: &RuleSelector,
        stop: &CancellationToken,
    ) -> bool {
        for rule in &self.rules {
            if stop.is_cancelled() {
                return false;
            }
            match run_rule(rule.as_ref(), provider, selector).await {
                Ok(RuleOutcome::Executed) => {}
                Ok(outcome) => debug!(rule = rule.name(), ?outcome, "rule skipped"),
                Err(failure) => {
                    let report = provider.report().clone();
                    report_rule_failure(report.as_ref(), rule.name(), failure);
                }
            }
        }
        true
    }
}

/// Combined rules selected for one class.
#[derive(Clone, Default)]
pub struct EnabledCombinedRuleList {
    rules: Vec<Arc<dyn CombinedRule>>,
}

impl EnabledCombinedRuleList {
    /// The selected rules.
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn CombinedRule>] {
        &self.rules
    }

    /// Returns `true` if no rule is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every combined rule; same isolation and stop semantics as
    /// [`EnabledRuleList::run`]. Failures go to the run-level report.
    pub fn run(&self, provider: &mut CombinedValueProvider<'_>, stop: &CancellationToken) -> bool {
        for rule in &self.rules {
            if stop.is_cancelled() {
                return false;
            }
            match run_combined_rule(rule.as_ref(), provider) {
                Ok(RuleOutcome::Executed) => {}
                Ok(outcome) => debug!(rule = rule.name(), ?outcome, "combined rule skipped"),
                Err(failure) => {
                    let report = provider.report().clone();
                    report_rule_failure(report.as_ref(), rule.name(), failure);
                }
            }
        }
        true
    }
}

fn report_rule_failure<R: CommonReport + ?Sized>(report: &R, rule: &str, failure: String) {
    warn!(rule, error = %failure, "rule failed");
    report.log(
        ReportLevel::Error,
        messages::RULE_EXCEPTION,
        &[
            NamedArg::new(arg::RULE_NAME, rule),
            NamedArg::new(arg::EXCEPTION, failure),
        ],
    );
}
