//! Per-entity value providers.
//!
//! [`ValueProvider`] wraps an entity's [`ValueCache`] and its generators and
//! computes values on demand. [`AsyncValueProvider`] adds suspendable
//! generators and run-wide shared values on top of it.
//!
//! Failure isolation: a generator that returns an error or panics never
//! propagates the failure. Its tags are cached empty and a critical
//! `generator_exception` report naming the generator is emitted.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::cache::{CachedValue, ValueCache};
use crate::failure::{
    flatten_outcome, report_cycle, report_generator_failure, report_no_generator,
};
use crate::generator::{
    pair_outputs, AsyncGeneratorList, GeneratedValues, Generator, SyncGeneratorList,
};
use crate::report::EntityReport;
use crate::shared::SharedValueProvider;
use crate::value::{Dependency, DependencyValues, Value, ValueTag};
use crate::{BoxError, RuleClassMask};

/// The per-entity generators of a run.
#[derive(Default, Clone)]
pub struct EntityGenerators {
    /// Synchronous generators.
    pub sync: SyncGeneratorList,
    /// Suspendable generators. Consulted before the synchronous ones.
    pub asynchronous: AsyncGeneratorList,
}

// ---------------------------------------------------------------------------
// ValueProvider
// ---------------------------------------------------------------------------

/// Synchronous generate-on-demand provider for one entity.
///
/// Only generators supporting one of the entity's detected rule classes are
/// consulted; a tag whose generator does not apply is treated as having none.
pub struct ValueProvider {
    cache: ValueCache,
    classes: RuleClassMask,
    generators: Arc<EntityGenerators>,
    report: Arc<dyn EntityReport>,
    resolving: Vec<ValueTag>,
}

impl ValueProvider {
    /// Creates a provider over `cache` for an entity of the `classes`
    /// detected; failures go to `report`.
    pub fn new(
        cache: ValueCache,
        classes: RuleClassMask,
        generators: Arc<EntityGenerators>,
        report: Arc<dyn EntityReport>,
    ) -> Self {
        Self {
            cache,
            classes,
            generators,
            report,
            resolving: Vec::new(),
        }
    }

    /// Returns the value of `tag`, computing it with the synchronous
    /// generators if needed.
    pub fn get(&mut self, tag: ValueTag) -> Option<Value> {
        match self.cache.get(tag) {
            CachedValue::Value(value) => return Some(value.clone()),
            CachedValue::Empty => return None,
            CachedValue::Uncomputed => {}
        }
        if self.enter(tag) {
            return None;
        }

        let result = match self.generators.sync.get_for(tag, self.classes).cloned() {
            Some(generator) => {
                let deps = self.resolve(generator.dependencies());
                self.run_sync(generator.as_ref(), deps);
                self.cache.get(tag).value().cloned()
            }
            None => {
                self.no_generator(tag);
                None
            }
        };

        self.leave(tag);
        result
    }

    /// Resolves `dependencies` in declaration order.
    ///
    /// Returns `None` as soon as a required dependency resolves to empty;
    /// the remaining dependencies are not computed.
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

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    /// Rule classes detected for the entity.
    #[must_use]
    pub fn rule_classes(&self) -> RuleClassMask {
        self.classes
    }

    /// Mutable access to the underlying cache.
    pub fn cache_mut(&mut self) -> &mut ValueCache {
        &mut self.cache
    }

    /// Consumes the provider, returning its cache.
    #[must_use]
    pub fn into_cache(self) -> ValueCache {
        self.cache
    }

    /// The entity's report sink.
    #[must_use]
    pub fn report(&self) -> &Arc<dyn EntityReport> {
        &self.report
    }

    /// Marks `tag` as being resolved. Returns `true` (and reports) on re-entry.
    fn enter(&mut self, tag: ValueTag) -> bool {
        if self.resolving.contains(&tag) {
            report_cycle(self.report.as_ref(), tag.name());
            return true;
        }
        self.resolving.push(tag);
        false
    }

    fn leave(&mut self, tag: ValueTag) {
        if let Some(pos) = self.resolving.iter().rposition(|t| *t == tag) {
            self.resolving.remove(pos);
        }
    }

    fn run_sync(&mut self, generator: &dyn Generator, deps: Option<DependencyValues>) {
        let tags = generator.produces();
        let Some(deps) = deps else {
            debug!(generator = generator.name(), "required dependency empty; skipping generator");
            self.store(tags, Vec::new());
            return;
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| generator.generate(&deps)));
        let values = self.settle(generator.name(), outcome);
        self.store(tags, values);
    }

    fn settle(
        &self,
        generator: &str,
        outcome: std::thread::Result<Result<GeneratedValues, BoxError>>,
    ) -> GeneratedValues {
        flatten_outcome(outcome).unwrap_or_else(|failure| {
            report_generator_failure(self.report.as_ref(), generator, failure);
            Vec::new()
        })
    }

    fn store(&mut self, tags: &[ValueTag], values: GeneratedValues) {
        for (tag, value) in pair_outputs(tags, values) {
            self.cache.set(tag, value);
        }
    }

    fn no_generator(&mut self, tag: ValueTag) {
        report_no_generator(self.report.as_ref(), tag.name());
        self.cache.set(tag, None);
    }
}

// ---------------------------------------------------------------------------
// AsyncValueProvider
// ---------------------------------------------------------------------------

/// Suspendable generate-on-demand provider for one entity.
///
/// Lookup order: the entity cache, the run-wide [`SharedValueProvider`], the
/// asynchronous generators, the synchronous generators.
pub struct AsyncValueProvider {
    inner: ValueProvider,
    shared: Arc<SharedValueProvider>,
}

impl AsyncValueProvider {
    /// Wraps a synchronous provider.
    pub fn new(inner: ValueProvider, shared: Arc<SharedValueProvider>) -> Self {
        Self { inner, shared }
    }

    /// Returns the value of `tag`, computing it if needed.
    ///
    /// Shared values are returned as-is and never copied into the entity cache.
    pub fn get_async(&mut self, tag: ValueTag) -> BoxFuture<'_, Option<Value>> {
        async move {
            match self.inner.cache.get(tag) {
                CachedValue::Value(value) => return Some(value.clone()),
                CachedValue::Empty => return None,
                CachedValue::Uncomputed => {}
            }
            if self.shared.contains(tag) {
                return self.shared.get_async(tag).await;
            }

            let generators = self.inner.generators.clone();
            let classes = self.inner.classes;
            if let Some(generator) = generators.asynchronous.get_for(tag, classes) {
                if self.inner.enter(tag) {
                    return None;
                }
                let tags = generator.produces();
                if let Some(deps) = self.resolve(generator.dependencies()).await {
                    let outcome = AssertUnwindSafe(generator.generate(&deps))
                        .catch_unwind()
                        .await;
                    let values = self.inner.settle(generator.name(), outcome);
                    self.inner.store(tags, values);
                } else {
                    debug!(generator = generator.name(), "required dependency empty; skipping generator");
                    self.inner.store(tags, Vec::new());
                }
                self.inner.leave(tag);
                return self.inner.cache.get(tag).value().cloned();
            }

            if let Some(generator) = generators.sync.get_for(tag, classes) {
                if self.inner.enter(tag) {
                    return None;
                }
                // Resolve asynchronously so that synchronous generators may
                // depend on shared or suspendable values.
                let deps = self.resolve(generator.dependencies()).await;
                self.inner.run_sync(generator.as_ref(), deps);
                self.inner.leave(tag);
                return self.inner.cache.get(tag).value().cloned();
            }

            self.inner.no_generator(tag);
            None
        }
        .boxed()
    }

    /// Resolves `dependencies` in declaration order.
    ///
    /// Returns `None` as soon as a required dependency resolves to empty;
    /// the remaining dependencies are not computed.
    pub async fn resolve(&mut self, dependencies: &[Dependency]) -> Option<DependencyValues> {
        let mut values = DependencyValues::new();
        for dep in dependencies {
            let value = self.get_async(dep.tag).await;
            if dep.required && value.is_none() {
                return None;
            }
            values.push(dep.tag, value);
        }
        Some(values)
    }

    /// The synchronous provider underneath.
    #[must_use]
    pub fn sync_provider(&mut self) -> &mut ValueProvider {
        &mut self.inner
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &ValueCache {
        &self.inner.cache
    }

    /// Mutable access to the underlying cache.
    pub fn cache_mut(&mut self) -> &mut ValueCache {
        &mut self.inner.cache
    }

    /// The run-wide shared provider.
    #[must_use]
    pub fn shared(&self) -> &Arc<SharedValueProvider> {
        &self.shared
    }

    /// The entity's report sink.
    #[must_use]
    pub fn report(&self) -> &Arc<dyn EntityReport> {
        &self.inner.report
    }

    /// Consumes the provider, returning its cache.
    #[must_use]
    pub fn into_cache(self) -> ValueCache {
        self.inner.cache
    }
}
