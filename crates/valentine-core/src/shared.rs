//! Values shared by every entity of a run.
//!
//! The [`SharedValueProvider`] combines pre-seeded constants with a set of
//! [`SharedGenerator`]s. Each generator runs at most once for the whole run,
//! no matter how many entities request its values concurrently:
//!
//! - every generator owns an async mutex and an `executed` flag;
//! - readers first check the flag (acquire ordering) and, once it is set,
//!   read the published slot without locking;
//! - the first requester takes the generator's mutex, re-checks the flag,
//!   runs the generator, fills its slots and publishes with release ordering.
//!
//! Independent generators never block each other.
//!
//! Declared dependencies between shared generators must be acyclic; this is
//! checked when the provider is built. A generator that, while running,
//! requests a value produced by itself or by a generator further up its own
//! call chain gets an empty value and a `dependency_cycle` report instead of
//! waiting on its own lock.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::debug;

use crate::failure::{flatten_outcome, report_cycle, report_generator_failure};
use crate::generator::{pair_outputs, GeneratedValues};
use crate::report::CommonReport;
use crate::value::{Value, ValueTag};
use crate::{BoxError, CoreError, CoreResult};

/// A generator whose values are computed once per run and shared by all entities.
#[async_trait]
pub trait SharedGenerator: Send + Sync {
    /// Name used in failure reports.
    fn name(&self) -> &str;

    /// Tags produced by this generator.
    fn produces(&self) -> &[ValueTag];

    /// Shared tags read through `shared` while generating.
    fn dependencies(&self) -> &[ValueTag] {
        &[]
    }

    /// Computes the produced values. May read other shared values through `shared`.
    ///
    /// Reads should be declared in [`dependencies`](Self::dependencies). Two
    /// generators running in different tasks must not wait on each other
    /// through undeclared reads.
    ///
    /// # Errors
    ///
    /// Any error marks every produced tag empty for the whole run.
    async fn generate(&self, shared: &SharedValueProvider) -> Result<GeneratedValues, BoxError>;
}

tokio::task_local! {
    // Shared generators running in the current task, outermost first.
    static RUNNING: Vec<usize>;
}

struct GeneratorState {
    generator: Arc<dyn SharedGenerator>,
    first_slot: usize,
    lock: tokio::sync::Mutex<()>,
    executed: AtomicBool,
}

/// Constants plus lazily computed, run-wide values.
pub struct SharedValueProvider {
    constants: HashMap<ValueTag, Value>,
    generators: Vec<GeneratorState>,
    slots: Vec<OnceLock<Option<Value>>>,
    // tag -> (generator index, slot index)
    index: HashMap<ValueTag, (usize, usize)>,
    report: Arc<dyn CommonReport>,
}

impl SharedValueProvider {
    /// Builds a provider. Generator failures are reported to `report`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateGeneratorTag`] if a tag is provided twice,
    /// by two generators or by a generator and a constant, and
    /// [`CoreError::DependencyCycle`] if the declared dependencies of the
    /// generators form a cycle.
    pub fn new(
        constants: Vec<(ValueTag, Value)>,
        generators: Vec<Arc<dyn SharedGenerator>>,
        report: Arc<dyn CommonReport>,
    ) -> CoreResult<Self> {
        let mut constant_map = HashMap::with_capacity(constants.len());
        for (tag, value) in constants {
            if constant_map.insert(tag, value).is_some() {
                return Err(CoreError::DuplicateGeneratorTag {
                    tag,
                    generator: "<constant>".to_owned(),
                });
            }
        }

        let total_tags = generators.iter().map(|g| g.produces().len()).sum();
        let mut index = HashMap::with_capacity(total_tags);
        let mut states = Vec::with_capacity(generators.len());
        let mut slot = 0usize;
        for (gen_index, generator) in generators.into_iter().enumerate() {
            let first_slot = slot;
            for tag in generator.produces() {
                if constant_map.contains_key(tag) || index.contains_key(tag) {
                    return Err(CoreError::DuplicateGeneratorTag {
                        tag: *tag,
                        generator: generator.name().to_owned(),
                    });
                }
                index.insert(*tag, (gen_index, slot));
                slot += 1;
            }
            states.push(GeneratorState {
                generator,
                first_slot,
                lock: tokio::sync::Mutex::new(()),
                executed: AtomicBool::new(false),
            });
        }

        check_acyclic(&states, &index)?;

        Ok(Self {
            constants: constant_map,
            generators: states,
            slots: (0..total_tags).map(|_| OnceLock::new()).collect(),
            index,
            report,
        })
    }

    /// A provider without constants or generators.
    #[must_use]
    pub fn empty(report: Arc<dyn CommonReport>) -> Self {
        Self {
            constants: HashMap::new(),
            generators: Vec::new(),
            slots: Vec::new(),
            index: HashMap::new(),
            report,
        }
    }

    /// Returns `true` if `tag` is a constant or produced by a shared generator.
    #[must_use]
    pub fn contains(&self, tag: ValueTag) -> bool {
        self.constants.contains_key(&tag) || self.index.contains_key(&tag)
    }

    /// Lock-free peek: returns the value if it is a constant or already published.
    ///
    /// Returns `None` for unregistered tags, unresolved tags and empty values alike.
    #[must_use]
    pub fn try_get(&self, tag: ValueTag) -> Option<Value> {
        if let Some(value) = self.constants.get(&tag) {
            return Some(value.clone());
        }
        let &(gen_index, slot) = self.index.get(&tag)?;
        if !self.generators[gen_index].executed.load(Ordering::Acquire) {
            return None;
        }
        self.slots[slot].get().cloned().flatten()
    }

    /// Returns the value of `tag`, running its generator on first request.
    ///
    /// # Panics
    ///
    /// Panics if `tag` is not registered; see [`contains`](Self::contains).
    pub async fn get_async(&self, tag: ValueTag) -> Option<Value> {
        if let Some(value) = self.constants.get(&tag) {
            return Some(value.clone());
        }
        let Some(&(gen_index, slot)) = self.index.get(&tag) else {
            panic!("shared value '{tag}' is not registered");
        };

        let state = &self.generators[gen_index];
        if !state.executed.load(Ordering::Acquire) {
            let mut running = RUNNING.try_with(Clone::clone).unwrap_or_default();
            if running.contains(&gen_index) {
                report_cycle(self.report.as_ref(), tag.name());
                return None;
            }
            let _guard = state.lock.lock().await;
            if !state.executed.load(Ordering::Acquire) {
                running.push(gen_index);
                RUNNING.scope(running, self.execute(state)).await;
                state.executed.store(true, Ordering::Release);
            }
        }
        self.slots[slot].get().cloned().flatten()
    }

    async fn execute(&self, state: &GeneratorState) {
        let generator = &state.generator;
        let tags = generator.produces();
        debug!(generator = generator.name(), "running shared generator");

        let outcome = AssertUnwindSafe(generator.generate(self))
            .catch_unwind()
            .await;
        let values = flatten_outcome(outcome).unwrap_or_else(|failure| {
            report_generator_failure(self.report.as_ref(), generator.name(), failure);
            Vec::new()
        });

        for (offset, (_, value)) in pair_outputs(tags, values).enumerate() {
            // Slots are written only here, under the generator lock.
            let _ = self.slots[state.first_slot + offset].set(value);
        }
    }
}

/// Edges of the shared dependency graph leaving `tag`.
fn declared_reads<'a>(
    generators: &'a [GeneratorState],
    index: &HashMap<ValueTag, (usize, usize)>,
    tag: ValueTag,
) -> &'a [ValueTag] {
    index
        .get(&tag)
        .map_or(&[], |&(gen_index, _)| generators[gen_index].generator.dependencies())
}

/// Depth-first search over declared reads; fails with the first cycle found.
fn check_acyclic(
    generators: &[GeneratorState],
    index: &HashMap<ValueTag, (usize, usize)>,
) -> CoreResult<()> {
    // true while the tag is on the current path
    let mut on_path: HashMap<ValueTag, bool> = HashMap::new();
    let mut starts: Vec<ValueTag> = index.keys().copied().collect();
    starts.sort_unstable_by_key(|tag| tag.name());
    for start in starts {
        if on_path.contains_key(&start) {
            continue;
        }
        let mut stack: Vec<(ValueTag, usize)> = vec![(start, 0)];
        on_path.insert(start, true);
        while let Some(top) = stack.last_mut() {
            let (tag, next) = *top;
            top.1 += 1;
            let Some(&dep) = declared_reads(generators, index, tag).get(next) else {
                on_path.insert(tag, false);
                stack.pop();
                continue;
            };
            match on_path.get(&dep) {
                Some(false) => {}
                Some(true) => {
                    let from = stack.iter().position(|(t, _)| *t == dep).unwrap_or(0);
                    let mut cycle: Vec<ValueTag> = stack[from..].iter().map(|(t, _)| *t).collect();
                    cycle.push(dep);
                    return Err(CoreError::DependencyCycle(cycle));
                }
                None => {
                    on_path.insert(dep, true);
                    stack.push((dep, 0));
                }
            }
        }
    }
    Ok(())
}
