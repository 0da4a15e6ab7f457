//! Value-style single-value cache.

use std::sync::Arc;

use super::slot::Slot;
use super::traits::{disposer_of, Cache, CacheOf, CacheStorage, Dispose, Disposer, Storage};

/// One lazily computed value stored inline.
///
/// Same contract as [`SingleValueCache`](super::SingleValueCache), but the
/// state lives in the container itself instead of behind an allocation.
/// Cloning copies the current state: each copy populates and invalidates
/// independently from then on, while the populate callback stays shared.
/// Meant for types carrying many small caches as plain fields.
#[derive(Clone)]
pub struct SingleValueCacheByValue<T> {
    slot: Slot<T>,
    populate: Arc<dyn Fn() -> T + Send + Sync>,
    disposer: Disposer<T>,
}

impl<T> SingleValueCacheByValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(populate: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            slot: Slot::new(),
            populate: Arc::new(populate),
            disposer: None,
        }
    }

    /// Create a cache that disposes every value it evicts.
    ///
    /// Copies of a populated cache hold clones of one value; each copy
    /// disposes its own clone when it evicts it.
    pub fn disposing<F>(populate: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Dispose,
    {
        Self {
            disposer: disposer_of::<T>(),
            ..Self::new(populate)
        }
    }

    /// Get the cached value, computing it on first access.
    pub fn value(&self) -> T {
        self.slot.get_or_populate(|| (self.populate)()).0
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

impl<T> Cache for SingleValueCacheByValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        SingleValueCacheByValue::invalidate(self);
    }

    fn cached_len(&self) -> usize {
        usize::from(self.is_cached())
    }
}

impl<T> CacheOf<T> for SingleValueCacheByValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cached_values(&self) -> Vec<T> {
        self.get_if_cached().into_iter().collect()
    }
}

impl<T> CacheStorage for SingleValueCacheByValue<T> {
    const STORAGE: Storage = Storage::Inline;
}

impl<T: std::fmt::Debug> std::fmt::Debug for SingleValueCacheByValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleValueCacheByValue")
            .field("slot", &self.slot)
            .finish()
    }
}
