//! The capability shared by every cache container.

use std::sync::Arc;

/// A lazily populated container that can be invalidated.
///
/// Implemented by every container in this crate and by [`CacheRegistry`],
/// so caches can be stored and invalidated behind `Arc<dyn Cache>`.
///
/// [`CacheRegistry`]: crate::cache::CacheRegistry
pub trait Cache: Send + Sync {
    /// Drops (or disposes) every cached value; the next read repopulates.
    fn invalidate(&self);

    /// Number of values currently held.
    fn cached_len(&self) -> usize;

    /// Disposing a container is the same as invalidating it.
    fn dispose(&self) {
        self.invalidate();
    }
}

/// A cache whose currently held values can be enumerated.
pub trait CacheOf<T>: Cache {
    /// Snapshot of the values cached right now.
    ///
    /// Empty after `invalidate`, refilled by subsequent reads.
    fn cached_values(&self) -> Vec<T>;
}

/// How clones of a container relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Clones alias one state: populating through one is visible to all.
    Shared,
    /// Clones snapshot the state and diverge afterwards.
    Inline,
}

/// Static storage kind of a container type.
pub trait CacheStorage {
    const STORAGE: Storage;
}

/// A value holding a resource that must be released when evicted from a cache.
///
/// Containers built through their `disposing` constructors call
/// [`Dispose::dispose`] exactly once per evicted value.
pub trait Dispose {
    fn dispose(&self);
}

impl<T: Dispose + ?Sized> Dispose for Arc<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

impl<T: Dispose + ?Sized> Dispose for Box<T> {
    fn dispose(&self) {
        (**self).dispose();
    }
}

/// Eviction hook stored by a container: `Some` when values must be disposed.
pub(crate) type Disposer<T> = Option<fn(&T)>;

pub(crate) fn disposer_of<T: Dispose>() -> Disposer<T> {
    Some(<T as Dispose>::dispose)
}
