//! Reference-style single-value cache.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::trace;

use super::registry::{Enlistment, Track};
use super::slot::Slot;
use super::traits::{disposer_of, Cache, CacheOf, CacheStorage, Dispose, Disposer, Storage};

type Populate<T> = Box<dyn Fn() -> T + Send + Sync>;

/// One lazily computed value behind shared state.
///
/// Cloning is cheap and aliases the same value: populating or invalidating
/// through any clone is seen by all of them. Concurrent first reads run the
/// populate callback once; the other readers wait and observe its result.
///
/// ## Example
///
/// ```rust
/// use lazycache::SingleValueCache;
///
/// let answer = SingleValueCache::new(|| 6 * 7);
/// assert!(!answer.is_cached());
/// assert_eq!(answer.value(), 42);
/// assert!(answer.is_cached());
/// ```
pub struct SingleValueCache<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    slot: Slot<T>,
    populate: Populate<T>,
    disposer: Disposer<T>,
    registry: OnceCell<Enlistment>,
}

// Manual Clone implementation that doesn't require T: Clone
impl<T> Clone for SingleValueCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SingleValueCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache whose evicted values are simply dropped.
    pub fn new<F>(populate: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(populate), None)
    }

    /// Create a cache that disposes every value it evicts.
    pub fn disposing<F>(populate: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Dispose,
    {
        Self::from_parts(Box::new(populate), disposer_of::<T>())
    }

    fn from_parts(populate: Populate<T>, disposer: Disposer<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Slot::new(),
                populate,
                disposer,
                registry: OnceCell::new(),
            }),
        }
    }

    /// Get the cached value, computing it on first access.
    pub fn value(&self) -> T {
        let (value, populated) = self.inner.slot.get_or_populate(|| (self.inner.populate)());
        if populated {
            trace!("single-value cache populated");
            self.enlist();
        }
        value
    }

    /// Get the value only if it is already cached.
    pub fn get_if_cached(&self) -> Option<T> {
        self.inner.slot.get()
    }

    /// Store `value` as cached without running the populate callback.
    ///
    /// The displaced value, if any, is returned to the caller undisposed.
    pub fn set(&self, value: T) -> Option<T> {
        let previous = self.inner.slot.set(value);
        self.enlist();
        previous
    }

    pub fn is_cached(&self) -> bool {
        self.inner.slot.is_cached()
    }

    /// Clear the cached value, disposing it if this cache was built with
    /// [`SingleValueCache::disposing`].
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    fn enlist(&self) {
        if let Some(registry) = self.inner.registry.get() {
            registry.enlist(self.identity(), self.inner.clone());
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        if self.slot.invalidate(self.disposer) && self.disposer.is_some() {
            trace!("single-value cache disposed its value");
        }
    }
}

impl<T> Cache for Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        Inner::invalidate(self);
    }

    fn cached_len(&self) -> usize {
        usize::from(self.slot.is_cached())
    }
}

impl<T> Cache for SingleValueCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self.inner.invalidate();
    }

    fn cached_len(&self) -> usize {
        usize::from(self.is_cached())
    }
}

impl<T> CacheOf<T> for SingleValueCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cached_values(&self) -> Vec<T> {
        self.get_if_cached().into_iter().collect()
    }
}

impl<T> CacheStorage for SingleValueCache<T> {
    const STORAGE: Storage = Storage::Shared;
}

impl<T> Track for SingleValueCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn attach(&self, enlistment: Enlistment) -> bool {
        if self.inner.registry.set(enlistment).is_err() {
            return false;
        }
        if self.is_cached() {
            self.enlist();
        }
        true
    }

    fn identity(&self) -> usize {
        SingleValueCache::identity(self)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SingleValueCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleValueCache")
            .field("slot", &self.inner.slot)
            .field("disposing", &self.inner.disposer.is_some())
            .finish()
    }
}
