//! Per-class recycling primitives.
//!
//! A [Recycler] hands out items, reusing previously returned ones when it has
//! them and building fresh ones otherwise. Retention is best-effort: a recycler
//! may drop anything it is given, and callers must never depend on getting a
//! particular item back.

use crossbeam_queue::ArrayQueue;
use std::num::NonZeroUsize;

/// Builds a fresh item when a recycler has nothing to reuse.
pub type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A thread-safe get-or-build cache.
pub trait Recycler: Send + Sync {
    /// The recycled item.
    type Item;

    /// Returns a previously offered item, if one is retained.
    fn take(&self) -> Option<Self::Item>;

    /// Builds a fresh item.
    fn build(&self) -> Self::Item;

    /// Returns a previously offered item, or a new one if none is available.
    fn get(&self) -> Self::Item {
        self.take().unwrap_or_else(|| self.build())
    }

    /// Offers `item` for reuse.
    ///
    /// Returns `false` if the item was dropped instead of retained.
    fn put(&self, item: Self::Item) -> bool;

    /// Returns the number of items currently retained.
    fn len(&self) -> usize;

    /// Returns `true` if no items are retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bounded lock-free free list.
///
/// Holds at most `capacity` items. Offers beyond that are dropped.
pub struct Freelist<T> {
    items: ArrayQueue<T>,
    factory: Factory<T>,
}

impl<T> Freelist<T> {
    /// Creates an empty free list that retains at most `capacity` items.
    pub fn new(capacity: NonZeroUsize, factory: Factory<T>) -> Self {
        Self {
            items: ArrayQueue::new(capacity.get()),
            factory,
        }
    }

    /// Returns the maximum number of retained items.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}

impl<T: Send> Recycler for Freelist<T> {
    type Item = T;

    #[inline]
    fn take(&self) -> Option<T> {
        self.items.pop()
    }

    fn build(&self) -> T {
        (self.factory)()
    }

    #[inline]
    fn put(&self, item: T) -> bool {
        self.items.push(item).is_ok()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A recycler that never retains anything.
///
/// Every [Recycler::get] builds a new item. Useful to disable reuse without
/// changing the code that allocates and frees.
pub struct Discard<T> {
    factory: Factory<T>,
}

impl<T> Discard<T> {
    /// Creates a recycler that always builds with `factory`.
    pub fn new(factory: Factory<T>) -> Self {
        Self { factory }
    }
}

impl<T> Recycler for Discard<T> {
    type Item = T;

    fn take(&self) -> Option<T> {
        None
    }

    fn build(&self) -> T {
        (self.factory)()
    }

    fn put(&self, _item: T) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }
}
