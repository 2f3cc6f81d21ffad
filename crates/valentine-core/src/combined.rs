//! Values of the combined (cross-entity) phase.
//!
//! After every entity finished its own rules, the values the combined phase
//! needs are kept in a [`CollectedEntity`] per entity. [`CombinedGenerator`]s
//! read those collections and produce combined values, which the synchronous
//! [`CombinedValueProvider`] computes on demand, with the same failure
//! isolation as the per-entity providers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CachedValue, ValueCache};
use crate::entity::SubjectEntity;
use crate::failure::{flatten_outcome, report_cycle, report_generator_failure, report_no_generator};
use crate::generator::{pair_outputs, GeneratedValues, GeneratorList, ProducesValues};
use crate::report::{CommonReport, EntityReport};
use crate::selector::RuleSelector;
use crate::value::{Dependency, DependencyValues, Value, ValueTag};
use crate::{BoxError, RuleClassMask};

// ---------------------------------------------------------------------------
// CollectedEntity
// ---------------------------------------------------------------------------

/// What one entity hands over to the combined phase.
pub struct CollectedEntity {
    /// The entity itself.
    pub entity: Arc<dyn SubjectEntity>,
    /// Individual values, trimmed to what the combined phase needs.
    pub values: ValueCache,
    /// Sink for combined findings about this entity.
    pub report: Arc<dyn EntityReport>,
    /// The selector that applied to this entity.
    pub selector: Arc<RuleSelector>,
}

impl CollectedEntity {
    /// Returns the individual value of `tag` downcast to `T`.
    #[must_use]
    pub fn get<T: Any>(&self, tag: ValueTag) -> Option<&T> {
        self.values.get_typed(tag)
    }
}

// ---------------------------------------------------------------------------
// CombinedGenerator
// ---------------------------------------------------------------------------

/// Produces combined values out of all collected entities.
pub trait CombinedGenerator: Send + Sync {
    /// Name used in failure reports.
    fn name(&self) -> &str;

    /// Combined tags produced by this generator.
    fn produces(&self) -> &[ValueTag];

    /// Individual tags read from every [`CollectedEntity`].
    fn individual_dependencies(&self) -> &[ValueTag] {
        &[]
    }

    /// Other combined values this generator needs.
    fn combined_dependencies(&self) -> &[Dependency] {
        &[]
    }

    /// Computes the produced values.
    ///
    /// # Errors
    ///
    /// Any error marks every produced tag empty.
    fn generate(
        &self,
        entities: &[CollectedEntity],
        combined: &DependencyValues,
    ) -> Result<GeneratedValues, BoxError>;
}

impl ProducesValues for dyn CombinedGenerator {
    fn generator_name(&self) -> &str {
        self.name()
    }

    fn produced_tags(&self) -> &[ValueTag] {
        self.produces()
    }

    fn supported_classes(&self) -> RuleClassMask {
        RuleClassMask::all()
    }
}

/// Combined generators of a run.
pub type CombinedGeneratorList = GeneratorList<dyn CombinedGenerator>;

// ---------------------------------------------------------------------------
// CombinedValueProvider
// ---------------------------------------------------------------------------

/// Generate-on-demand provider of combined values for one rule class.
pub struct CombinedValueProvider<'a> {
    entities: &'a [CollectedEntity],
    generators: &'a CombinedGeneratorList,
    cache: ValueCache,
    report: Arc<dyn CommonReport>,
    resolving: Vec<ValueTag>,
}

impl<'a> CombinedValueProvider<'a> {
    /// Creates a provider over the collected `entities`.
    pub fn new(
        entities: &'a [CollectedEntity],
        generators: &'a CombinedGeneratorList,
        report: Arc<dyn CommonReport>,
    ) -> Self {
        Self {
            entities,
            generators,
            cache: ValueCache::new(),
            report,
            resolving: Vec::new(),
        }
    }

    /// The collected entities.
    #[must_use]
    pub fn entities(&self) -> &'a [CollectedEntity] {
        self.entities
    }

    /// The run-level report sink.
    #[must_use]
    pub fn report(&self) -> &Arc<dyn CommonReport> {
        &self.report
    }

    /// Returns the combined value of `tag`, computing it if needed.
    pub fn get(&mut self, tag: ValueTag) -> Option<Value> {
        match self.cache.get(tag) {
            CachedValue::Value(value) => return Some(value.clone()),
            CachedValue::Empty => return None,
            CachedValue::Uncomputed => {}
        }

        let Some(generator) = self.generators.get(tag).cloned() else {
            report_no_generator(self.report.as_ref(), tag.name());
            self.cache.set(tag, None);
            return None;
        };
        if self.resolving.contains(&tag) {
            report_cycle(self.report.as_ref(), tag.name());
            return None;
        }
        self.resolving.push(tag);

        let tags = generator.produces();
        let values = match self.resolve(generator.combined_dependencies()) {
            Some(deps) => {
                let entities = self.entities;
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    generator.generate(entities, &deps)
                }));
                flatten_outcome(outcome).unwrap_or_else(|failure| {
                    report_generator_failure(self.report.as_ref(), generator.name(), failure);
                    Vec::new()
                })
            }
            None => {
                debug!(generator = generator.name(), "required combined dependency empty; skipping generator");
                Vec::new()
            }
        };
        for (produced, value) in pair_outputs(tags, values) {
            self.cache.set(produced, value);
        }

        self.resolving.retain(|t| *t != tag);
        self.cache.get(tag).value().cloned()
    }

    /// Resolves combined `dependencies`; `None` if a required one is empty.
    pub fn resolve(&mut self, dependencies: &[Dependency]) -> Option<DependencyValues> {
        let mut values = DependencyValues::new();
        for dep in dependencies {
            let value = self.get(dep.tag);
            if dep.required && value.is_none() {
                return None;
            }
            values.push(dep.tag, value);
        }
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::entity::FileEntity;
    use crate::messages;
    use crate::test_support::RecordingReport;
    use crate::value::make_value;

    const SIZE: ValueTag = ValueTag::new("test.size");
    const TOTAL: ValueTag = ValueTag::new("combined.total");
    const AVERAGE: ValueTag = ValueTag::new("combined.average");
    const BROKEN: ValueTag = ValueTag::new("combined.broken");

    struct Total;

    impl CombinedGenerator for Total {
        fn name(&self) -> &str {
            "total"
        }

        fn produces(&self) -> &[ValueTag] {
            &[TOTAL]
        }

        fn individual_dependencies(&self) -> &[ValueTag] {
            &[SIZE]
        }

        fn generate(
            &self,
            entities: &[CollectedEntity],
            _combined: &DependencyValues,
        ) -> Result<GeneratedValues, BoxError> {
            let total: u64 = entities.iter().filter_map(|e| e.get::<u64>(SIZE)).sum();
            Ok(vec![Some(make_value(total))])
        }
    }

    struct Average;

    impl CombinedGenerator for Average {
        fn name(&self) -> &str {
            "average"
        }

        fn produces(&self) -> &[ValueTag] {
            &[AVERAGE]
        }

        fn combined_dependencies(&self) -> &[Dependency] {
            const DEPS: &[Dependency] = &[Dependency::required(TOTAL)];
            DEPS
        }

        fn generate(
            &self,
            entities: &[CollectedEntity],
            combined: &DependencyValues,
        ) -> Result<GeneratedValues, BoxError> {
            let total = *combined.require::<u64>(TOTAL)?;
            let count = u64::try_from(entities.len())?;
            Ok(vec![Some(make_value(total / count))])
        }
    }

    struct Broken;

    impl CombinedGenerator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn produces(&self) -> &[ValueTag] {
            &[BROKEN]
        }

        fn generate(
            &self,
            _entities: &[CollectedEntity],
            _combined: &DependencyValues,
        ) -> Result<GeneratedValues, BoxError> {
            Err("no data".into())
        }
    }

    fn collected(size: u64, report: &Arc<RecordingReport>) -> CollectedEntity {
        let mut values = ValueCache::new();
        values.set(SIZE, Some(make_value(size)));
        CollectedEntity {
            entity: Arc::new(FileEntity::new(PathBuf::from(format!("{size}.bin")), size)),
            values,
            report: report.clone(),
            selector: Arc::new(RuleSelector::new()),
        }
    }

    fn generators() -> CombinedGeneratorList {
        let mut list = CombinedGeneratorList::new();
        list.add(Arc::new(Total)).unwrap();
        list.add(Arc::new(Average)).unwrap();
        list.add(Arc::new(Broken)).unwrap();
        list
    }

    #[test]
    fn combined_values_chain_through_dependencies() {
        let report = RecordingReport::new();
        let entities = vec![collected(10, &report), collected(20, &report), collected(30, &report)];
        let generators = generators();
        let mut provider = CombinedValueProvider::new(&entities, &generators, report.clone());

        let average = provider.get(AVERAGE).unwrap();
        assert_eq!(average.downcast_ref::<u64>(), Some(&20));
        assert_eq!(provider.get(TOTAL).unwrap().downcast_ref::<u64>(), Some(&60));
        assert!(report.messages.lock().is_empty());
    }

    #[test]
    fn combined_failures_are_isolated() {
        let report = RecordingReport::new();
        let entities = vec![collected(1, &report)];
        let generators = generators();
        let mut provider = CombinedValueProvider::new(&entities, &generators, report.clone());

        assert!(provider.get(BROKEN).is_none());
        assert!(provider.get(ValueTag::new("combined.unknown")).is_none());
        assert_eq!(
            report.message_ids(),
            vec![messages::GENERATOR_EXCEPTION, messages::NO_GENERATOR_FOR_TYPE]
        );
    }
}
