//! The rule contract and the adapters that run rules.
//!
//! A rule declares its reports, an optional applicability check over a set of
//! *prerequisite* values and a body over its *run* values. The adapter
//! resolves the prerequisites first and only computes the (possibly
//! expensive) run values for entities the rule applies to.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::combined::{CollectedEntity, CombinedValueProvider};
use crate::failure::flatten_outcome;
use crate::provider::AsyncValueProvider;
use crate::report::{CommonReport, EntityReport, NamedArg, ReportDescriptor};
use crate::selector::RuleSelector;
use crate::value::{Dependency, DependencyValues, ValueTag};
use crate::{BoxError, RuleClass};

// ---------------------------------------------------------------------------
// RuleReporter
// ---------------------------------------------------------------------------

/// Handed to a rule body; forwards findings that pass the selector.
pub struct RuleReporter<'a> {
    report: &'a dyn EntityReport,
    selector: &'a RuleSelector,
    reports: &'a [ReportDescriptor],
}

impl<'a> RuleReporter<'a> {
    /// Creates a reporter for a rule declaring `reports`.
    pub fn new(
        report: &'a dyn EntityReport,
        selector: &'a RuleSelector,
        reports: &'a [ReportDescriptor],
    ) -> Self {
        Self {
            report,
            selector,
            reports,
        }
    }

    /// Emits a finding unless the selector suppresses it.
    ///
    /// Argument filters are only evaluated here, when the rule actually fires.
    pub fn log(&self, report: &ReportDescriptor, args: &[NamedArg]) {
        debug_assert!(
            self.reports.iter().any(|r| r.uid == report.uid),
            "report '{}' is not declared by the rule",
            report.uid
        );
        if self.selector.is_enabled_with_args(report, args) {
            self.report.rule_log(report, args);
        }
    }

    /// Returns `true` if `report` passes the coarse selector check.
    #[must_use]
    pub fn is_enabled(&self, report: &ReportDescriptor) -> bool {
        self.selector.is_enabled(report)
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A check run against one entity.
pub trait Rule: Send + Sync {
    /// Name used in failure reports and rule listings.
    fn name(&self) -> &str;

    /// The rule class this rule is registered for.
    fn rule_class(&self) -> RuleClass;

    /// Every report this rule may emit.
    fn reports(&self) -> &[ReportDescriptor];

    /// Values needed by [`is_applicable`](Self::is_applicable).
    fn prerequisites(&self) -> &[Dependency] {
        &[]
    }

    /// Decides whether the rule applies, given its prerequisites.
    fn is_applicable(&self, _prerequisites: &DependencyValues) -> bool {
        true
    }

    /// Values needed by [`run`](Self::run).
    fn dependencies(&self) -> &[Dependency] {
        &[]
    }

    /// Runs the check.
    ///
    /// # Errors
    ///
    /// A returned error is reported as a rule failure; other rules still run.
    fn run(&self, reporter: &RuleReporter<'_>, deps: &DependencyValues) -> Result<(), BoxError>;
}

/// What happened when the adapter ran a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The body ran to completion.
    Executed,
    /// The applicability check returned `false`.
    NotApplicable,
    /// A required prerequisite or run dependency was empty.
    MissingDependency,
}

/// Runs `rule` against the entity behind `provider`.
///
/// # Errors
///
/// Returns the failure description if the applicability check or the body
/// returned an error or panicked.
pub async fn run_rule(
    rule: &dyn Rule,
    provider: &mut AsyncValueProvider,
    selector: &RuleSelector,
) -> Result<RuleOutcome, String> {
    let Some(prerequisites) = provider.resolve(rule.prerequisites()).await else {
        return Ok(RuleOutcome::MissingDependency);
    };
    let applicable = std::panic::catch_unwind(AssertUnwindSafe(|| {
        Ok::<_, BoxError>(rule.is_applicable(&prerequisites))
    }));
    if !flatten_outcome(applicable)? {
        return Ok(RuleOutcome::NotApplicable);
    }

    let Some(deps) = provider.resolve(rule.dependencies()).await else {
        return Ok(RuleOutcome::MissingDependency);
    };
    let report = provider.report().clone();
    let reporter = RuleReporter::new(report.as_ref(), selector, rule.reports());
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| rule.run(&reporter, &deps)));
    flatten_outcome(outcome)?;
    Ok(RuleOutcome::Executed)
}

// ---------------------------------------------------------------------------
// CombinedRule
// ---------------------------------------------------------------------------

/// One collected entity as seen by a combined rule body.
pub struct CombinedEntity<'a> {
    /// The collected values of the entity.
    pub collected: &'a CollectedEntity,
    /// Reporter writing into the entity's own report sink.
    pub reporter: RuleReporter<'a>,
}

impl CombinedEntity<'_> {
    /// Returns the individual value of `tag` downcast to `T`.
    #[must_use]
    pub fn get<T: std::any::Any>(&self, tag: ValueTag) -> Option<&T> {
        self.collected.get(tag)
    }
}

/// A check run across all entities of a rule class after phase 1.
pub trait CombinedRule: Send + Sync {
    /// Name used in failure reports and rule listings.
    fn name(&self) -> &str;

    /// The rule class this rule is registered for.
    fn rule_class(&self) -> RuleClass;

    /// Every report this rule may emit.
    fn reports(&self) -> &[ReportDescriptor];

    /// Individual values the rule reads from every entity.
    fn individual_dependencies(&self) -> &[ValueTag] {
        &[]
    }

    /// Combined values needed by [`is_applicable`](Self::is_applicable).
    fn prerequisites(&self) -> &[Dependency] {
        &[]
    }

    /// Decides whether the rule applies, given its combined prerequisites.
    fn is_applicable(&self, _prerequisites: &DependencyValues) -> bool {
        true
    }

    /// Combined values needed by [`run`](Self::run).
    fn dependencies(&self) -> &[Dependency] {
        &[]
    }

    /// Decides whether entities analyzed under `selector` take part.
    fn applies_to(&self, selector: &RuleSelector) -> bool {
        self.reports().iter().any(|report| selector.is_enabled(report))
    }

    /// Runs the check.
    ///
    /// # Errors
    ///
    /// A returned error is reported as a rule failure; other rules still run.
    fn run(
        &self,
        entities: &[CombinedEntity<'_>],
        report: &dyn CommonReport,
        deps: &DependencyValues,
    ) -> Result<(), BoxError>;
}

/// Runs a combined `rule` over the entities it applies to.
///
/// # Errors
///
/// Returns the failure description if the applicability check or the body
/// returned an error or panicked.
pub fn run_combined_rule(
    rule: &dyn CombinedRule,
    provider: &mut CombinedValueProvider<'_>,
) -> Result<RuleOutcome, String> {
    let Some(prerequisites) = provider.resolve(rule.prerequisites()) else {
        return Ok(RuleOutcome::MissingDependency);
    };
    let applicable = std::panic::catch_unwind(AssertUnwindSafe(|| {
        Ok::<_, BoxError>(rule.is_applicable(&prerequisites))
    }));
    if !flatten_outcome(applicable)? {
        return Ok(RuleOutcome::NotApplicable);
    }
    let Some(deps) = provider.resolve(rule.dependencies()) else {
        return Ok(RuleOutcome::MissingDependency);
    };

    let entities: Vec<CombinedEntity<'_>> = provider
        .entities()
        .iter()
        .filter(|collected| rule.applies_to(&collected.selector))
        .map(|collected| CombinedEntity {
            collected,
            reporter: RuleReporter::new(
                collected.report.as_ref(),
                collected.selector.as_ref(),
                rule.reports(),
            ),
        })
        .collect();
    let report: Arc<dyn CommonReport> = provider.report().clone();
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        rule.run(&entities, report.as_ref(), &deps)
    }));
    flatten_outcome(outcome)?;
    Ok(RuleOutcome::Executed)
}
