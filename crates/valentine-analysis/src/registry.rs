//! Process-wide, read-only engine state: rules, generators and the format detector.

use std::sync::Arc;

use valentine_core::combined::{CombinedGenerator, CombinedGeneratorList};
use valentine_core::detector::FormatDetector;
use valentine_core::generator::{AsyncGenerator, Generator};
use valentine_core::provider::EntityGenerators;
use valentine_core::report::CommonReport;
use valentine_core::rule::{CombinedRule, Rule};
use valentine_core::rule_list::RuleList;
use valentine_core::shared::{SharedGenerator, SharedValueProvider};
use valentine_core::value::{Value, ValueTag};
use valentine_core::CoreResult;
use valentine_report::InMemoryCommonReport;

/// Everything registered before a run starts. Never mutated while running.
pub struct EngineRegistry {
    rules: RuleList,
    generators: Arc<EntityGenerators>,
    combined_generators: CombinedGeneratorList,
    shared_generators: Vec<Arc<dyn SharedGenerator>>,
    shared_constants: Vec<(ValueTag, Value)>,
    detector: Arc<dyn FormatDetector>,
    startup_report: Arc<InMemoryCommonReport>,
}

impl EngineRegistry {
    /// An empty registry detecting formats with `detector`.
    #[must_use]
    pub fn new(detector: Arc<dyn FormatDetector>) -> Self {
        Self {
            rules: RuleList::new(),
            generators: Arc::new(EntityGenerators::default()),
            combined_generators: CombinedGeneratorList::new(),
            shared_generators: Vec::new(),
            shared_constants: Vec::new(),
            detector,
            startup_report: Arc::new(InMemoryCommonReport::new()),
        }
    }

    /// Registers a per-entity rule.
    ///
    /// # Errors
    ///
    /// Fails if one of the rule's report uids is already registered.
    pub fn add_rule(&mut self, rule: Arc<dyn Rule>) -> CoreResult<()> {
        self.rules.register(rule)
    }

    /// Registers a combined rule.
    ///
    /// # Errors
    ///
    /// Fails if one of the rule's report uids is already registered.
    pub fn add_combined_rule(&mut self, rule: Arc<dyn CombinedRule>) -> CoreResult<()> {
        self.rules.register_combined(rule)
    }

    /// Registers a synchronous per-entity generator.
    ///
    /// # Errors
    ///
    /// Fails if a produced tag already has a generator.
    pub fn add_generator(&mut self, generator: Arc<dyn Generator>) -> CoreResult<()> {
        Arc::make_mut(&mut self.generators).sync.add(generator)
    }

    /// Registers a suspendable per-entity generator.
    ///
    /// # Errors
    ///
    /// Fails if a produced tag already has a generator.
    pub fn add_async_generator(&mut self, generator: Arc<dyn AsyncGenerator>) -> CoreResult<()> {
        Arc::make_mut(&mut self.generators).asynchronous.add(generator)
    }

    /// Registers a combined generator.
    ///
    /// # Errors
    ///
    /// Fails if a produced tag already has a generator.
    pub fn add_combined_generator(&mut self, generator: Arc<dyn CombinedGenerator>) -> CoreResult<()> {
        self.combined_generators.add(generator)
    }

    /// Registers a run-wide generator. Tag clashes are detected when a run starts.
    pub fn add_shared_generator(&mut self, generator: Arc<dyn SharedGenerator>) {
        self.shared_generators.push(generator);
    }

    /// Registers a run-wide constant. Tag clashes are detected when a run starts.
    pub fn add_shared_constant(&mut self, tag: ValueTag, value: Value) {
        self.shared_constants.push((tag, value));
    }

    /// Buffer for diagnostics raised before a run; replayed into every run's report.
    #[must_use]
    pub fn startup_report(&self) -> &Arc<InMemoryCommonReport> {
        &self.startup_report
    }

    /// The rule registry.
    #[must_use]
    pub fn rules(&self) -> &RuleList {
        &self.rules
    }

    /// The per-entity generators.
    #[must_use]
    pub fn generators(&self) -> &Arc<EntityGenerators> {
        &self.generators
    }

    /// The combined generators.
    #[must_use]
    pub fn combined_generators(&self) -> &CombinedGeneratorList {
        &self.combined_generators
    }

    /// The format detector.
    #[must_use]
    pub fn detector(&self) -> &Arc<dyn FormatDetector> {
        &self.detector
    }

    /// Builds a fresh shared value provider for one run.
    ///
    /// # Errors
    ///
    /// Fails if two shared generators or constants provide the same tag, or
    /// if the declared reads of the shared generators form a cycle.
    pub fn shared_provider(&self, report: Arc<dyn CommonReport>) -> CoreResult<SharedValueProvider> {
        SharedValueProvider::new(
            self.shared_constants.clone(),
            self.shared_generators.clone(),
            report,
        )
    }
}
