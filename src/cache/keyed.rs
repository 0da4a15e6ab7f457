//! Unbounded concurrent cache addressed by key.

use std::convert::Infallible;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::trace;

use super::config::CacheConfig;
use super::error::Result;
use super::registry::{Enlistment, Track};
use super::traits::{disposer_of, Cache, CacheOf, CacheStorage, Dispose, Disposer, Storage};

type Populate<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// Lazily populated entries keyed by `K`, `populate(&k)` computing each one.
///
/// Hits are lock-free reads on a [`DashMap`]. Misses serialize on a lock
/// owned by the current backing map, so each key is populated at most once
/// between clears. The lock is reentrant: `populate(&k)` may read other keys
/// of the same cache. `clear` swaps in a fresh map.
///
/// Cloning is cheap and aliases the same entries.
///
/// ## Example
///
/// ```rust
/// use lazycache::KeyedCache;
///
/// let names = KeyedCache::new(|id: &u32| format!("user-{id}"));
/// assert_eq!(names.get(&7), "user-7");
/// assert_eq!(names.try_get_existing(&8), None);
/// ```
pub struct KeyedCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    current: RwLock<Arc<Generation<K, V>>>,
    populate: Populate<K, V>,
    disposer: Disposer<V>,
    initial_capacity: usize,
    shard_amount: Option<usize>,
    registry: OnceCell<Enlistment>,
    enlisted: AtomicBool,
}

/// One backing map together with the lock its misses serialize on.
struct Generation<K, V> {
    map: DashMap<K, V>,
    gate: ReentrantMutex<()>,
    retired: AtomicBool,
}

impl<K, V> Generation<K, V>
where
    K: Eq + Hash,
{
    fn new(initial_capacity: usize, shard_amount: Option<usize>) -> Self {
        let map = match shard_amount {
            Some(shards) => DashMap::with_capacity_and_shard_amount(initial_capacity, shards),
            None => DashMap::with_capacity(initial_capacity),
        };
        Self {
            map,
            gate: ReentrantMutex::new(()),
            retired: AtomicBool::new(false),
        }
    }
}

impl<K, V> Clone for KeyedCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F>(populate: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self::from_parts(&CacheConfig::default(), Box::new(populate), None)
    }

    /// Create a cache sized by `config`.
    ///
    /// Fails if the config does not validate.
    pub fn with_config<F>(config: &CacheConfig, populate: F) -> Result<Self>
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::from_parts(config, Box::new(populate), None))
    }

    /// Create a cache that disposes every value it evicts on `clear`.
    pub fn disposing<F>(config: &CacheConfig, populate: F) -> Result<Self>
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
        V: Dispose,
    {
        config.validate()?;
        Ok(Self::from_parts(config, Box::new(populate), disposer_of::<V>()))
    }

    fn from_parts(config: &CacheConfig, populate: Populate<K, V>, disposer: Disposer<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                current: RwLock::new(Arc::new(Generation::new(
                    config.initial_capacity,
                    config.shard_amount,
                ))),
                populate,
                disposer,
                initial_capacity: config.initial_capacity,
                shard_amount: config.shard_amount,
                registry: OnceCell::new(),
                enlisted: AtomicBool::new(false),
            }),
        }
    }

    /// Get the value for `key`, populating it on a miss.
    pub fn get(&self, key: &K) -> V {
        let populate = |key: &K| Ok::<_, Infallible>((self.inner.populate)(key));
        match self.get_or_try_populate(key, populate) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Get the value for `key`, reporting a panicking populate callback as
    /// `None` instead of unwinding. Nothing is cached on failure.
    pub fn try_get(&self, key: &K) -> Option<V> {
        match catch_unwind(AssertUnwindSafe(|| self.get(key))) {
            Ok(value) => Some(value),
            Err(_) => {
                trace!("keyed cache population failed");
                None
            }
        }
    }

    /// Get the value for `key`, populating a miss with the fallible
    /// `populate` instead of the cache's own callback.
    ///
    /// An error is returned to the caller and never cached.
    pub fn get_or_try_populate<E, F>(&self, key: &K, populate: F) -> std::result::Result<V, E>
    where
        F: FnOnce(&K) -> std::result::Result<V, E>,
    {
        loop {
            let generation = self.inner.generation();
            if let Some(entry) = generation.map.get(key) {
                return Ok(entry.value().clone());
            }

            let gate = generation.gate.lock();
            if generation.retired.load(Ordering::Acquire) {
                // Cleared while we waited; retry against the fresh map.
                continue;
            }
            if let Some(entry) = generation.map.get(key) {
                return Ok(entry.value().clone());
            }

            let value = populate(key)?;
            if generation.retired.load(Ordering::Acquire) {
                // `populate` cleared this cache on our own thread.
                return Ok(value);
            }
            generation.map.insert(key.clone(), value.clone());
            drop(gate);

            trace!("keyed cache entry populated");
            self.enlist();
            return Ok(value);
        }
    }

    /// Get the value for `key` only if it is already cached.
    pub fn try_get_existing(&self, key: &K) -> Option<V> {
        self.inner
            .generation()
            .map
            .get(key)
            .map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.generation().map.contains_key(key)
    }

    /// Store `value` under `key` without populating; returns the displaced
    /// value undisposed.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        loop {
            let generation = self.inner.generation();
            let gate = generation.gate.lock();
            if generation.retired.load(Ordering::Acquire) {
                continue;
            }
            let previous = generation.map.insert(key, value);
            drop(gate);

            self.enlist();
            return previous;
        }
    }

    /// Remove `key`, handing its value back to the caller undisposed.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner
            .generation()
            .map
            .remove(key)
            .map(|(_, value)| value)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.generation().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cached keys.
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .generation()
            .map
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Swap in an empty map, disposing the old values if this cache was
    /// built with [`KeyedCache::disposing`].
    pub fn clear(&self) {
        self.inner.clear();
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

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn generation(&self) -> Arc<Generation<K, V>> {
        Arc::clone(&self.current.read())
    }

    fn clear(&self) {
        let fresh = Arc::new(Generation::new(self.initial_capacity, self.shard_amount));

        // Reset before the swap: a population racing with `clear` then
        // re-enlists rather than landing unregistered in the fresh map.
        self.enlisted.store(false, Ordering::Release);
        let old = std::mem::replace(&mut *self.current.write(), fresh);

        // No insert lands in `old` once it is retired under its gate.
        let _gate = old.gate.lock();
        old.retired.store(true, Ordering::Release);

        if let Some(dispose) = self.disposer {
            let mut disposed = 0usize;
            for entry in old.map.iter() {
                dispose(entry.value());
                disposed += 1;
            }
            trace!(disposed, "keyed cache cleared");
        }
        old.map.clear();
    }
}

impl<K, V> Cache for Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self.clear();
    }

    fn cached_len(&self) -> usize {
        self.generation().map.len()
    }
}

impl<K, V> Cache for KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self.clear();
    }

    fn cached_len(&self) -> usize {
        self.len()
    }
}

impl<K, V> CacheOf<V> for KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cached_values(&self) -> Vec<V> {
        self.inner
            .generation()
            .map
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl<K, V> CacheStorage for KeyedCache<K, V> {
    const STORAGE: Storage = Storage::Shared;
}

impl<K, V> Track for KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn attach(&self, enlistment: Enlistment) -> bool {
        if self.inner.registry.set(enlistment).is_err() {
            return false;
        }
        if !self.is_empty() {
            self.enlist();
        }
        true
    }

    fn identity(&self) -> usize {
        KeyedCache::identity(self)
    }
}

impl<K, V> std::fmt::Debug for KeyedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCache")
            .field("entry_count", &self.len())
            .field("disposing", &self.inner.disposer.is_some())
            .finish()
    }
}
