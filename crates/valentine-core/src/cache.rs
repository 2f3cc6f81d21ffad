//! Per-entity value store.
//!
//! A [`ValueCache`] is owned by exactly one entity pipeline and carries no
//! synchronization of its own. Every slot is in one of three states:
//! uncomputed, computed-empty or computed-value. Once computed, a slot is
//! never overwritten.

use std::any::Any;
use std::collections::HashMap;

use crate::value::{Value, ValueTag};

/// State of a single cache slot.
#[derive(Debug, Clone, Copy)]
pub enum CachedValue<'a> {
    /// Nothing has been stored for the tag yet.
    Uncomputed,
    /// The tag was computed and produced nothing (or its generator failed).
    Empty,
    /// The tag was computed and produced a value.
    Value(&'a Value),
}

impl<'a> CachedValue<'a> {
    /// Returns `true` for `Empty` and `Value`.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uncomputed)
    }

    /// Returns the stored value, if any.
    #[must_use]
    pub fn value(self) -> Option<&'a Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Uncomputed | Self::Empty => None,
        }
    }
}

/// Tri-state store of computed values for one entity.
#[derive(Debug, Default, Clone)]
pub struct ValueCache {
    slots: HashMap<ValueTag, Option<Value>>,
}

impl ValueCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the slot of `tag`.
    #[must_use]
    pub fn get(&self, tag: ValueTag) -> CachedValue<'_> {
        match self.slots.get(&tag) {
            None => CachedValue::Uncomputed,
            Some(None) => CachedValue::Empty,
            Some(Some(value)) => CachedValue::Value(value),
        }
    }

    /// Returns the value of `tag` downcast to `T`.
    #[must_use]
    pub fn get_typed<T: Any>(&self, tag: ValueTag) -> Option<&T> {
        self.get(tag).value().and_then(|v| v.downcast_ref::<T>())
    }

    /// Stores a computed (possibly empty) value.
    ///
    /// Returns `false` and leaves the slot untouched if `tag` was already computed.
    pub fn set(&mut self, tag: ValueTag, value: Option<Value>) -> bool {
        if self.slots.contains_key(&tag) {
            return false;
        }
        self.slots.insert(tag, value);
        true
    }

    /// Resets `tag` to uncomputed. Returns `true` if it was computed before.
    pub fn remove(&mut self, tag: ValueTag) -> bool {
        self.slots.remove(&tag).is_some()
    }

    /// Keeps only the slots for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(ValueTag) -> bool) {
        self.slots.retain(|tag, _| keep(*tag));
    }

    /// Returns `true` if no slot has been computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of computed slots (empty ones included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Tags of all computed slots, in unspecified order.
    pub fn tags(&self) -> impl Iterator<Item = ValueTag> + '_ {
        self.slots.keys().copied()
    }
}
