//! Producers of tagged values.
//!
//! Every generator declares the tags it produces and the values it depends
//! on. Providers resolve the dependencies first, then hand them to
//! `generate`, which returns one (possibly empty) value per produced tag, in
//! the order of [`produces`](Generator::produces).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::value::{Dependency, DependencyValues, Value, ValueTag};
use crate::{BoxError, CoreError, CoreResult, RuleClassMask};

/// Values returned by a generator, aligned with its produced tags.
pub type GeneratedValues = Vec<Option<Value>>;

// ---------------------------------------------------------------------------
// Generator traits
// ---------------------------------------------------------------------------

/// A synchronous, per-entity generator.
pub trait Generator: Send + Sync {
    /// Name used in failure reports.
    fn name(&self) -> &str;

    /// Tags produced by this generator.
    fn produces(&self) -> &[ValueTag];

    /// Values this generator needs. Resolved in declaration order.
    fn dependencies(&self) -> &[Dependency] {
        &[]
    }

    /// Rule classes of the entities this generator runs on.
    fn rule_classes(&self) -> RuleClassMask {
        RuleClassMask::all()
    }

    /// Computes the produced values.
    ///
    /// # Errors
    ///
    /// Any error marks every produced tag empty for this entity.
    fn generate(&self, deps: &DependencyValues) -> Result<GeneratedValues, BoxError>;
}

/// A per-entity generator that may suspend (for instance while streaming the
/// entity contents).
#[async_trait]
pub trait AsyncGenerator: Send + Sync {
    /// Name used in failure reports.
    fn name(&self) -> &str;

    /// Tags produced by this generator.
    fn produces(&self) -> &[ValueTag];

    /// Values this generator needs. Resolved in declaration order.
    fn dependencies(&self) -> &[Dependency] {
        &[]
    }

    /// Rule classes of the entities this generator runs on.
    fn rule_classes(&self) -> RuleClassMask {
        RuleClassMask::all()
    }

    /// Computes the produced values.
    ///
    /// # Errors
    ///
    /// Any error marks every produced tag empty for this entity.
    async fn generate(&self, deps: &DependencyValues) -> Result<GeneratedValues, BoxError>;
}

// ---------------------------------------------------------------------------
// GeneratorList
// ---------------------------------------------------------------------------

/// What a [`GeneratorList`] needs to know about its entries.
pub trait ProducesValues: Send + Sync {
    /// Name used in error messages.
    fn generator_name(&self) -> &str;
    /// Tags the generator produces.
    fn produced_tags(&self) -> &[ValueTag];
    /// Rule classes the generator supports.
    fn supported_classes(&self) -> RuleClassMask;
}

impl ProducesValues for dyn Generator {
    fn generator_name(&self) -> &str {
        self.name()
    }

    fn produced_tags(&self) -> &[ValueTag] {
        self.produces()
    }

    fn supported_classes(&self) -> RuleClassMask {
        self.rule_classes()
    }
}

impl ProducesValues for dyn AsyncGenerator {
    fn generator_name(&self) -> &str {
        self.name()
    }

    fn produced_tags(&self) -> &[ValueTag] {
        self.produces()
    }

    fn supported_classes(&self) -> RuleClassMask {
        self.rule_classes()
    }
}

/// Registry mapping every tag to the single generator producing it.
pub struct GeneratorList<G: ?Sized> {
    generators: Vec<Arc<G>>,
    by_tag: HashMap<ValueTag, usize>,
}

/// Synchronous per-entity generators.
pub type SyncGeneratorList = GeneratorList<dyn Generator>;
/// Asynchronous per-entity generators.
pub type AsyncGeneratorList = GeneratorList<dyn AsyncGenerator>;

impl<G: ?Sized> Clone for GeneratorList<G> {
    fn clone(&self) -> Self {
        Self {
            generators: self.generators.clone(),
            by_tag: self.by_tag.clone(),
        }
    }
}

impl<G: ?Sized> Default for GeneratorList<G> {
    fn default() -> Self {
        Self {
            generators: Vec::new(),
            by_tag: HashMap::new(),
        }
    }
}

impl<G: ?Sized + ProducesValues> GeneratorList<G> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `generator` for all the tags it produces.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateGeneratorTag`] if one of its tags is
    /// already produced by a registered generator. The list is left unchanged.
    pub fn add(&mut self, generator: Arc<G>) -> CoreResult<()> {
        let tags = generator.produced_tags();
        for (i, tag) in tags.iter().enumerate() {
            if self.by_tag.contains_key(tag) || tags[..i].contains(tag) {
                return Err(CoreError::DuplicateGeneratorTag {
                    tag: *tag,
                    generator: generator.generator_name().to_owned(),
                });
            }
        }

        let index = self.generators.len();
        for tag in tags {
            self.by_tag.insert(*tag, index);
        }
        self.generators.push(generator);
        Ok(())
    }

    /// Returns the generator producing `tag`.
    #[must_use]
    pub fn get(&self, tag: ValueTag) -> Option<&Arc<G>> {
        self.by_tag.get(&tag).map(|&index| &self.generators[index])
    }

    /// Returns the generator producing `tag` for an entity of the `detected`
    /// classes. A generator supporting none of them is not returned.
    #[must_use]
    pub fn get_for(&self, tag: ValueTag, detected: RuleClassMask) -> Option<&Arc<G>> {
        self.get(tag)
            .filter(|generator| generator.supported_classes().intersects(detected))
    }

    /// Returns `true` if some generator produces `tag`.
    #[must_use]
    pub fn contains(&self, tag: ValueTag) -> bool {
        self.by_tag.contains_key(&tag)
    }

    /// All registered generators, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<G>> {
        self.generators.iter()
    }

    /// Number of registered generators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

/// Pairs produced tags with generated values; missing trailing values are empty.
pub(crate) fn pair_outputs(
    tags: &[ValueTag],
    values: GeneratedValues,
) -> impl Iterator<Item = (ValueTag, Option<Value>)> + '_ {
    let mut values = values.into_iter();
    tags.iter().map(move |tag| (*tag, values.next().flatten()))
}
