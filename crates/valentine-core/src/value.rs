//! Value tags, type-erased values and dependency declarations.
//!
//! A [`ValueTag`] names one lazily computed fact ("parsed headers", "version
//! info", ...). The fact itself travels as a [`Value`], a reference counted
//! `dyn Any` that consumers downcast to the concrete type they expect.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ValueTag
// ---------------------------------------------------------------------------

/// Identity of a lazily computed, cached fact.
///
/// Tags are interned static strings; two tags are equal iff their names are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueTag(&'static str);

impl ValueTag {
    /// Creates a tag with the given name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the tag name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A computed, immutable value. Shared by every consumer of the same tag.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wraps `value` into a [`Value`].
pub fn make_value<T: Any + Send + Sync>(value: T) -> Value {
    Arc::new(value)
}

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// A declared need for the value of `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// The needed value.
    pub tag: ValueTag,
    /// When `true`, the consumer is skipped if the value resolves to empty.
    pub required: bool,
}

impl Dependency {
    /// A dependency whose absence skips the consumer.
    #[must_use]
    pub const fn required(tag: ValueTag) -> Self {
        Self { tag, required: true }
    }

    /// A dependency passed through as `None` when absent.
    #[must_use]
    pub const fn optional(tag: ValueTag) -> Self {
        Self {
            tag,
            required: false,
        }
    }
}

// ---------------------------------------------------------------------------
// DependencyValues
// ---------------------------------------------------------------------------

/// Error returned by [`DependencyValues::require`].
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("value '{0}' is not available or has an unexpected type")]
pub struct MissingValue(pub ValueTag);

/// Resolved values of a dependency list, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DependencyValues {
    entries: Vec<(ValueTag, Option<Value>)>,
}

impl DependencyValues {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolved (possibly empty) value.
    pub fn push(&mut self, tag: ValueTag, value: Option<Value>) {
        self.entries.push((tag, value));
    }

    /// Returns the raw value of `tag`, if it resolved to a value.
    #[must_use]
    pub fn value(&self, tag: ValueTag) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Returns the value of `tag` downcast to `T`.
    #[must_use]
    pub fn get<T: Any>(&self, tag: ValueTag) -> Option<&T> {
        self.value(tag).and_then(|v| v.downcast_ref::<T>())
    }

    /// Like [`get`](Self::get), but turns absence into an error usable with `?`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingValue`] if the value is empty or of another type.
    pub fn require<T: Any>(&self, tag: ValueTag) -> Result<&T, MissingValue> {
        self.get(tag).ok_or(MissingValue(tag))
    }

    /// Number of resolved entries (empty ones included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
