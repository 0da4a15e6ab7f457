//! Single-value cache fed by an explicit context.

use super::slot::Slot;
use super::traits::{disposer_of, Cache, CacheOf, CacheStorage, Dispose, Disposer, Storage};

/// One lazily computed value produced by `populate(&context)`.
///
/// The populate rule is a plain function pointer and the context is stored
/// once, so many instances can share one rule without allocating a closure
/// each. Storage is inline like [`SingleValueCacheByValue`]: clones copy the
/// cached state and share a clone of the context.
///
/// [`SingleValueCacheByValue`]: super::SingleValueCacheByValue
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use lazycache::ContextualValueCache;
///
/// fn word_count(text: &Arc<str>) -> usize {
///     text.split_whitespace().count()
/// }
///
/// let words = ContextualValueCache::new(Arc::<str>::from("a b c"), word_count);
/// assert_eq!(words.value(), 3);
/// ```
#[derive(Clone)]
pub struct ContextualValueCache<T, C> {
    slot: Slot<T>,
    context: C,
    populate: fn(&C) -> T,
    disposer: Disposer<T>,
}

impl<T, C> ContextualValueCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(context: C, populate: fn(&C) -> T) -> Self {
        Self {
            slot: Slot::new(),
            context,
            populate,
            disposer: None,
        }
    }

    /// Create a cache that disposes every value it evicts.
    pub fn disposing(context: C, populate: fn(&C) -> T) -> Self
    where
        T: Dispose,
    {
        Self {
            disposer: disposer_of::<T>(),
            ..Self::new(context, populate)
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Get the cached value, computing it from the context on first access.
    pub fn value(&self) -> T {
        self.slot.get_or_populate(|| (self.populate)(&self.context)).0
    }

    pub fn get_if_cached(&self) -> Option<T> {
        self.slot.get()
    }

    /// Store `value` without populating; returns the displaced value.
    pub fn set(&self, value: T) -> Option<T> {
        self.slot.set(value)
    }

    pub fn is_cached(&self) -> bool {
        self.slot.is_cached()
    }

    pub fn invalidate(&self) {
        self.slot.invalidate(self.disposer);
    }
}

impl<T, C> Cache for ContextualValueCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn invalidate(&self) {
        ContextualValueCache::invalidate(self);
    }

    fn cached_len(&self) -> usize {
        usize::from(self.is_cached())
    }
}

impl<T, C> CacheOf<T> for ContextualValueCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn cached_values(&self) -> Vec<T> {
        self.get_if_cached().into_iter().collect()
    }
}

impl<T, C> CacheStorage for ContextualValueCache<T, C> {
    const STORAGE: Storage = Storage::Inline;
}

impl<T: std::fmt::Debug, C> std::fmt::Debug for ContextualValueCache<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextualValueCache")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
