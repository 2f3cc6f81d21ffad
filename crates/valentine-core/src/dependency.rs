//! Values the combined phase needs.
//!
//! Before phase 1 ends, the engine computes which combined values the enabled
//! combined rules will request (transitively, through the combined
//! generators) and which individual values feed them. Every entity then
//! resolves exactly those individual values and drops the rest of its cache.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::combined::CombinedGeneratorList;
use crate::failure::report_no_generator;
use crate::provider::AsyncValueProvider;
use crate::report::CommonReport;
use crate::rule::CombinedRule;
use crate::value::ValueTag;
use crate::{CoreError, CoreResult};

/// Closure of the values needed by a set of combined rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedDependencies {
    individual: BTreeSet<ValueTag>,
    combined: BTreeSet<ValueTag>,
}

impl CombinedDependencies {
    /// Walks the combined generator graph breadth-first, seeded from the
    /// dependencies of `rules`.
    ///
    /// A combined tag without a generator is reported to `report` and the
    /// walk continues.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DependencyCycle`] if the reachable part of the
    /// generator graph is cyclic.
    pub fn compute<'r, R>(
        rules: impl IntoIterator<Item = &'r Arc<R>>,
        generators: &CombinedGeneratorList,
        report: &dyn CommonReport,
    ) -> CoreResult<Self>
    where
        R: CombinedRule + ?Sized + 'r,
    {
        let mut result = Self::default();
        let mut queue = VecDeque::new();
        for rule in rules {
            result
                .individual
                .extend(rule.individual_dependencies().iter().copied());
            queue.extend(rule.prerequisites().iter().map(|dep| dep.tag));
            queue.extend(rule.dependencies().iter().map(|dep| dep.tag));
        }

        while let Some(tag) = queue.pop_front() {
            if !result.combined.insert(tag) {
                continue;
            }
            let Some(generator) = generators.get(tag) else {
                report_no_generator(report, tag.name());
                continue;
            };
            result
                .individual
                .extend(generator.individual_dependencies().iter().copied());
            queue.extend(generator.combined_dependencies().iter().map(|dep| dep.tag));
        }

        check_acyclic(&result.combined, generators)?;
        debug!(
            individual = result.individual.len(),
            combined = result.combined.len(),
            "combined dependencies resolved"
        );
        Ok(result)
    }

    /// Individual tags every entity has to keep.
    #[must_use]
    pub fn individual(&self) -> &BTreeSet<ValueTag> {
        &self.individual
    }

    /// Combined tags the combined rules will request.
    #[must_use]
    pub fn combined(&self) -> &BTreeSet<ValueTag> {
        &self.combined
    }

    /// Returns `true` if the combined phase needs nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.individual.is_empty() && self.combined.is_empty()
    }

    /// Merges `other` into `self`.
    pub fn extend(&mut self, other: &Self) {
        self.individual.extend(other.individual.iter().copied());
        self.combined.extend(other.combined.iter().copied());
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first search over generator edges; fails with the first cycle found.
fn check_acyclic(tags: &BTreeSet<ValueTag>, generators: &CombinedGeneratorList) -> CoreResult<()> {
    let mut marks: HashMap<ValueTag, Mark> = HashMap::new();
    for &start in tags {
        if marks.contains_key(&start) {
            continue;
        }
        // (tag, index of the next edge to follow)
        let mut stack: Vec<(ValueTag, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::InProgress);
        while let Some(top) = stack.last_mut() {
            let (tag, next) = *top;
            top.1 += 1;
            let edges = generators
                .get(tag)
                .map(|g| g.combined_dependencies())
                .unwrap_or_default();
            let Some(dep) = edges.get(next) else {
                marks.insert(tag, Mark::Done);
                stack.pop();
                continue;
            };
            match marks.get(&dep.tag) {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let from = stack.iter().position(|(t, _)| *t == dep.tag).unwrap_or(0);
                    let mut cycle: Vec<ValueTag> = stack[from..].iter().map(|(t, _)| *t).collect();
                    cycle.push(dep.tag);
                    return Err(CoreError::DependencyCycle(cycle));
                }
                None => {
                    marks.insert(dep.tag, Mark::InProgress);
                    stack.push((dep.tag, 0));
                }
            }
        }
    }
    Ok(())
}

/// Resolves the individual values the combined phase needs, then drops every
/// other entry of the entity's cache.
pub async fn prepare_individual_dependencies(
    provider: &mut AsyncValueProvider,
    dependencies: &CombinedDependencies,
) {
    for &tag in dependencies.individual() {
        provider.get_async(tag).await;
    }
    let keep = dependencies.individual();
    provider.cache_mut().retain(|tag| keep.contains(&tag));
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::ValueCache;
    use crate::combined::{CollectedEntity, CombinedGenerator};
    use crate::generator::{GeneratedValues, Generator};
    use crate::messages;
    use crate::provider::{EntityGenerators, ValueProvider};
    use crate::report::{ReportCategory, ReportDescriptor, ReportLevel};
    use crate::rule::CombinedEntity;
    use crate::shared::SharedValueProvider;
    use crate::test_support::RecordingReport;
    use crate::value::{make_value, Dependency, DependencyValues};
    use crate::{BoxError, RuleClass, RuleClassMask};

    const SIZE: ValueTag = ValueTag::new("entity.size");
    const NAME: ValueTag = ValueTag::new("entity.name");
    const SCRATCH: ValueTag = ValueTag::new("entity.scratch");
    const TOTAL: ValueTag = ValueTag::new("combined.total");
    const NAMES: ValueTag = ValueTag::new("combined.names");
    const GHOST: ValueTag = ValueTag::new("combined.ghost");

    const SUMMARY: ReportDescriptor =
        ReportDescriptor::new("C001", ReportCategory::Optimization, ReportLevel::Info);

    struct Node {
        name: &'static str,
        produces: [ValueTag; 1],
        individual: Vec<ValueTag>,
        combined: Vec<Dependency>,
    }

    impl CombinedGenerator for Node {
        fn name(&self) -> &str {
            self.name
        }

        fn produces(&self) -> &[ValueTag] {
            &self.produces
        }

        fn individual_dependencies(&self) -> &[ValueTag] {
            &self.individual
        }

        fn combined_dependencies(&self) -> &[Dependency] {
            &self.combined
        }

        fn generate(
            &self,
            _entities: &[CollectedEntity],
            _combined: &DependencyValues,
        ) -> Result<GeneratedValues, BoxError> {
            Ok(Vec::new())
        }
    }

    fn node(produces: ValueTag, individual: Vec<ValueTag>, combined: Vec<ValueTag>) -> Arc<Node> {
        Arc::new(Node {
            name: produces.name(),
            produces: [produces],
            individual,
            combined: combined.into_iter().map(Dependency::required).collect(),
        })
    }

    struct Summary {
        deps: Vec<Dependency>,
    }

    impl CombinedRule for Summary {
        fn name(&self) -> &str {
            "summary"
        }

        fn rule_class(&self) -> RuleClass {
            RuleClass::new(0)
        }

        fn reports(&self) -> &[ReportDescriptor] {
            &[SUMMARY]
        }

        fn individual_dependencies(&self) -> &[ValueTag] {
            &[NAME]
        }

        fn dependencies(&self) -> &[Dependency] {
            &self.deps
        }

        fn run(
            &self,
            _entities: &[CombinedEntity<'_>],
            _report: &dyn CommonReport,
            _deps: &DependencyValues,
        ) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn rules(deps: Vec<ValueTag>) -> Vec<Arc<dyn CombinedRule>> {
        vec![Arc::new(Summary {
            deps: deps.into_iter().map(Dependency::required).collect(),
        })]
    }

    #[test]
    fn closure_follows_generator_graph() {
        let mut generators = CombinedGeneratorList::new();
        generators.add(node(TOTAL, vec![SIZE], vec![NAMES])).unwrap();
        generators.add(node(NAMES, vec![NAME], Vec::new())).unwrap();
        let report = RecordingReport::new();

        let deps = CombinedDependencies::compute(&rules(vec![TOTAL]), &generators, report.as_ref())
            .unwrap();
        assert_eq!(deps.combined().iter().copied().collect::<Vec<_>>(), vec![NAMES, TOTAL]);
        assert_eq!(deps.individual().iter().copied().collect::<Vec<_>>(), vec![NAME, SIZE]);
        assert!(report.messages.lock().is_empty());
    }

    #[test]
    fn missing_combined_generator_is_reported_and_skipped() {
        let generators = CombinedGeneratorList::new();
        let report = RecordingReport::new();

        let deps = CombinedDependencies::compute(&rules(vec![GHOST]), &generators, report.as_ref())
            .unwrap();
        assert!(deps.combined().contains(&GHOST));
        assert_eq!(report.message_ids(), vec![messages::NO_GENERATOR_FOR_TYPE]);
    }

    #[test]
    fn cycle_fails_fast_with_path() {
        let mut generators = CombinedGeneratorList::new();
        generators.add(node(TOTAL, Vec::new(), vec![NAMES])).unwrap();
        generators.add(node(NAMES, Vec::new(), vec![TOTAL])).unwrap();
        let report = RecordingReport::new();

        let err = CombinedDependencies::compute(&rules(vec![TOTAL]), &generators, report.as_ref())
            .unwrap_err();
        let path = match err {
            CoreError::DependencyCycle(path) => path,
            other => panic!("expected a cycle, got {other}"),
        };
        assert_eq!(path.first(), path.last());
        assert!(path.contains(&TOTAL) && path.contains(&NAMES));
    }

    struct Fixed;

    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn produces(&self) -> &[ValueTag] {
            &[SIZE, NAME, SCRATCH]
        }

        fn generate(&self, _deps: &DependencyValues) -> Result<GeneratedValues, BoxError> {
            Ok(vec![
                Some(make_value(10u64)),
                Some(make_value("a.exe".to_owned())),
                Some(make_value(vec![0u8; 1024])),
            ])
        }
    }

    #[tokio::test]
    async fn preparation_keeps_only_needed_values() {
        let report = RecordingReport::new();
        let mut generators = EntityGenerators::default();
        generators.sync.add(Arc::new(Fixed)).unwrap();
        let inner = ValueProvider::new(ValueCache::new(), RuleClassMask::all(), Arc::new(generators), report.clone());
        let mut provider =
            AsyncValueProvider::new(inner, Arc::new(SharedValueProvider::empty(report.clone())));
        provider.get_async(SCRATCH).await;

        let mut combined = CombinedGeneratorList::new();
        combined.add(node(TOTAL, vec![SIZE], Vec::new())).unwrap();
        let deps = CombinedDependencies::compute(&rules(vec![TOTAL]), &combined, report.as_ref())
            .unwrap();
        prepare_individual_dependencies(&mut provider, &deps).await;

        let cache = provider.into_cache();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_typed::<u64>(SIZE), Some(&10));
        assert!(cache.get_typed::<String>(NAME).is_some());
        assert!(!cache.get(SCRATCH).is_initialized());
    }
}
