//! Fixed-length cache addressed by index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::trace;

use super::config::{CacheConfig, Locking};
use super::error::{CacheError, Result};
use super::registry::{Enlistment, Track};
use super::traits::{disposer_of, Cache, CacheOf, CacheStorage, Dispose, Disposer, Storage};

type Populate<T> = Box<dyn Fn(usize) -> T + Send + Sync>;

/// A fixed number of lazily populated slots, `populate(i)` filling slot `i`.
///
/// The length is set at construction and never changes. With
/// [`Locking::Enabled`] one container-wide lock serializes misses, so every
/// slot is populated at most once between clears. The lock is reentrant, so
/// `populate(i)` may read other slots of the same cache. With
/// [`Locking::Disabled`] misses are not serialized (see [`Locking`]).
///
/// Cloning is cheap and aliases the same slots.
pub struct IndexedCache<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    slots: RwLock<Box<[Option<T>]>>,
    gate: ReentrantMutex<()>,
    populate: Populate<T>,
    len: usize,
    locking: Locking,
    disposer: Disposer<T>,
    registry: OnceCell<Enlistment>,
    enlisted: AtomicBool,
}

impl<T> Clone for IndexedCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn empty_slots<T>(len: usize) -> Box<[Option<T>]> {
    (0..len).map(|_| None).collect()
}

impl<T> IndexedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache of `len` slots with locking enabled.
    pub fn new<F>(len: usize, populate: F) -> Self
    where
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        Self::from_parts(len, Locking::Enabled, Box::new(populate), None)
    }

    pub fn with_config<F>(len: usize, config: &CacheConfig, populate: F) -> Self
    where
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        Self::from_parts(len, config.locking, Box::new(populate), None)
    }

    /// Create a cache that disposes every value it evicts on `clear`.
    pub fn disposing<F>(len: usize, config: &CacheConfig, populate: F) -> Self
    where
        F: Fn(usize) -> T + Send + Sync + 'static,
        T: Dispose,
    {
        Self::from_parts(len, config.locking, Box::new(populate), disposer_of::<T>())
    }

    fn from_parts(len: usize, locking: Locking, populate: Populate<T>, disposer: Disposer<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(empty_slots(len)),
                gate: ReentrantMutex::new(()),
                populate,
                len,
                locking,
                disposer,
                registry: OnceCell::new(),
                enlisted: AtomicBool::new(false),
            }),
        }
    }

    /// Number of slots (cached or not).
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn locking(&self) -> Locking {
        self.inner.locking
    }

    /// Get slot `index`, populating it on first access.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn get(&self, index: usize) -> T {
        match self.get_checked(index) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    /// Like [`IndexedCache::get`], reporting an out-of-range index as an error.
    pub fn get_checked(&self, index: usize) -> Result<T> {
        self.check_bounds(index)?;

        if let Some(value) = self.inner.slots.read()[index].as_ref() {
            return Ok(value.clone());
        }

        let value = match self.inner.locking {
            Locking::Enabled => {
                let _gate = self.inner.gate.lock();
                if let Some(value) = self.inner.slots.read()[index].as_ref() {
                    return Ok(value.clone());
                }
                let value = (self.inner.populate)(index);
                self.inner.slots.write()[index] = Some(value.clone());
                value
            }
            Locking::Disabled => {
                let value = (self.inner.populate)(index);
                let mut slots = self.inner.slots.write();
                if let Some(winner) = slots[index].as_ref() {
                    // A concurrent miss published first. Our duplicate was never
                    // handed out, so it is the one to discard.
                    let winner = winner.clone();
                    drop(slots);
                    if let Some(dispose) = self.inner.disposer {
                        dispose(&value);
                    }
                    trace!(index, "indexed cache discarded a duplicate population");
                    return Ok(winner);
                }
                slots[index] = Some(value.clone());
                value
            }
        };

        trace!(index, "indexed cache slot populated");
        self.enlist();
        Ok(value)
    }

    /// Get slot `index` only if it is already cached.
    pub fn get_if_cached(&self, index: usize) -> Option<T> {
        self.inner.slots.read().get(index).cloned().flatten()
    }

    /// Store `value` in slot `index` without populating; returns the
    /// displaced value undisposed.
    ///
    /// # Panics
    /// Panics if `index >= len`.
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        if let Err(e) = self.check_bounds(index) {
            panic!("{e}");
        }
        let previous = {
            let _gate = self.inner.lock_gate();
            self.inner.slots.write()[index].replace(value)
        };
        self.enlist();
        previous
    }

    /// Replace every slot with an empty one, disposing the old values if
    /// this cache was built with [`IndexedCache::disposing`].
    pub fn clear(&self) {
        self.inner.clear();
    }

    fn check_bounds(&self, index: usize) -> Result<()> {
        if index < self.inner.len {
            Ok(())
        } else {
            Err(CacheError::IndexOutOfRange {
                index,
                len: self.inner.len,
            })
        }
    }

    fn enlist(&self) {
        if let Some(registry) = self.inner.registry.get()
            && !self.inner.enlisted.swap(true, Ordering::AcqRel)
        {
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
    /// Holds the population gate, or nothing when locking is disabled.
    fn lock_gate(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        match self.locking {
            Locking::Enabled => Some(self.gate.lock()),
            Locking::Disabled => None,
        }
    }

    fn clear(&self) {
        let fresh = empty_slots(self.len);

        // Reset before the swap: a population racing with `clear` then
        // re-enlists rather than landing unregistered in the fresh slots.
        self.enlisted.store(false, Ordering::Release);

        let Some(dispose) = self.disposer else {
            let evicted = std::mem::replace(&mut *self.slots.write(), fresh);
            drop(evicted);
            return;
        };

        // Disposal stays under the gate unless locking is disabled, in which
        // case no reader may race with `clear`.
        let _gate = self.lock_gate();
        let evicted = std::mem::replace(&mut *self.slots.write(), fresh);

        let mut disposed = 0usize;
        for value in evicted.iter().flatten() {
            dispose(value);
            disposed += 1;
        }
        trace!(disposed, "indexed cache cleared");
    }

    fn cached_len(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }
}

impl<T> Cache for Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self.clear();
    }

    fn cached_len(&self) -> usize {
        Inner::cached_len(self)
    }
}

impl<T> Cache for IndexedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self.inner.clear();
    }

    fn cached_len(&self) -> usize {
        self.inner.cached_len()
    }
}

impl<T> CacheOf<T> for IndexedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cached_values(&self) -> Vec<T> {
        self.inner.slots.read().iter().flatten().cloned().collect()
    }
}

impl<T> CacheStorage for IndexedCache<T> {
    const STORAGE: Storage = Storage::Shared;
}

impl<T> Track for IndexedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn attach(&self, enlistment: Enlistment) -> bool {
        if self.inner.registry.set(enlistment).is_err() {
            return false;
        }
        if self.inner.cached_len() > 0 {
            self.enlist();
        }
        true
    }

    fn identity(&self) -> usize {
        IndexedCache::identity(self)
    }
}

impl<T> std::fmt::Debug for IndexedCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedCache")
            .field("len", &self.inner.len)
            .field("cached", &self.inner.cached_len())
            .field("locking", &self.inner.locking)
            .finish()
    }
}
