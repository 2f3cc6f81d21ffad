//! State of the combined (cross-entity) phase.
//!
//! Built before the first target loads: the enabled combined rules per class
//! and the closure of values they need. CPU tasks hand over each finished
//! entity's trimmed values; once the barrier passes, [`CombinedContext::run`]
//! evaluates the combined rules class by class.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use valentine_core::combined::{CollectedEntity, CombinedValueProvider};
use valentine_core::dependency::{prepare_individual_dependencies, CombinedDependencies};
use valentine_core::entity::SubjectEntity;
use valentine_core::provider::AsyncValueProvider;
use valentine_core::report::{CommonReport, EntityReport};
use valentine_core::rule_list::EnabledCombinedRuleList;
use valentine_core::selector::RuleSelector;
use valentine_core::{CoreResult, RuleClass, RuleClassMask};

use crate::plan::AnalysisPlan;
use crate::registry::EngineRegistry;

/// Combined rules, their value closure and the entities collected so far.
pub struct CombinedContext {
    rules: BTreeMap<RuleClass, EnabledCombinedRuleList>,
    dependencies: CombinedDependencies,
    collected: Mutex<BTreeMap<RuleClass, Vec<CollectedEntity>>>,
}

impl CombinedContext {
    /// Prepares the combined phase of `plan`.
    ///
    /// Returns `None` if the phase is disabled or no combined rule is enabled
    /// by any of the plan's selectors. Combined tags without a generator are
    /// reported to `report`.
    ///
    /// # Errors
    ///
    /// Returns [`valentine_core::CoreError::DependencyCycle`] if the combined
    /// generators needed by the enabled rules depend on each other in a cycle.
    pub fn prepare(
        plan: &AnalysisPlan,
        registry: &EngineRegistry,
        report: &dyn CommonReport,
    ) -> CoreResult<Option<Self>> {
        if !plan.combined_analysis {
            return Ok(None);
        }

        let selectors = plan.all_selectors();
        let rules: BTreeMap<_, _> = registry
            .rules()
            .combined_rule_classes()
            .map(|class| (class, registry.rules().get_enabled_combined_rules(class, &selectors)))
            .filter(|(_, list)| !list.is_empty())
            .collect();
        if rules.is_empty() {
            debug!("no combined rule enabled; combined phase disabled");
            return Ok(None);
        }

        let dependencies = CombinedDependencies::compute(
            rules.values().flat_map(|list| list.rules().iter()),
            registry.combined_generators(),
            report,
        )?;
        Ok(Some(Self {
            rules,
            dependencies,
            collected: Mutex::new(BTreeMap::new()),
        }))
    }

    /// Returns `true` if any class of `mask` has combined rules.
    #[must_use]
    pub fn wants(&self, mask: RuleClassMask) -> bool {
        mask.iter().any(|class| self.rules.contains_key(&class))
    }

    /// The value closure of the enabled combined rules.
    #[must_use]
    pub fn dependencies(&self) -> &CombinedDependencies {
        &self.dependencies
    }

    /// Resolves the individual values the combined phase needs, drops the
    /// rest of the entity's cache and keeps the entity for every class of
    /// `mask` that has combined rules.
    pub async fn store_values(
        &self,
        entity: Arc<dyn SubjectEntity>,
        mut provider: AsyncValueProvider,
        report: Arc<dyn EntityReport>,
        selector: Arc<RuleSelector>,
        mask: RuleClassMask,
    ) {
        if !self.wants(mask) {
            return;
        }
        prepare_individual_dependencies(&mut provider, &self.dependencies).await;
        let values = provider.into_cache();

        let mut collected = self.collected.lock();
        for class in mask.iter().filter(|c| self.rules.contains_key(c)) {
            collected.entry(class).or_default().push(CollectedEntity {
                entity: entity.clone(),
                values: values.clone(),
                report: report.clone(),
                selector: selector.clone(),
            });
        }
    }

    /// Number of entities collected for `class`.
    #[must_use]
    pub fn collected_count(&self, class: RuleClass) -> usize {
        self.collected.lock().get(&class).map_or(0, Vec::len)
    }

    /// Runs the combined rules of every class over the collected entities.
    ///
    /// Entities are presented sorted by path. `stop` is checked before each
    /// class and between rules. Returns `false` if the phase was cut short.
    pub fn run(
        &self,
        registry: &EngineRegistry,
        report: &Arc<dyn CommonReport>,
        stop: &CancellationToken,
    ) -> bool {
        let mut collected = std::mem::take(&mut *self.collected.lock());
        for (class, rules) in &self.rules {
            if stop.is_cancelled() {
                return false;
            }
            let Some(mut entities) = collected.remove(class) else {
                continue;
            };
            entities.sort_by(|a, b| a.entity.path().cmp(b.entity.path()));
            info!(%class, entities = entities.len(), rules = rules.rules().len(), "running combined rules");

            let mut provider =
                CombinedValueProvider::new(&entities, registry.combined_generators(), report.clone());
            if !rules.run(&mut provider, stop) {
                return false;
            }
        }
        true
    }
}
