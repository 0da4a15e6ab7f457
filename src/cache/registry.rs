//! Cache registry - Invalidates every cache that has done work as one batch.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::config::CacheConfig;
use super::error::Result;
use super::traits::{Cache, CacheOf, CacheStorage, Storage};
use super::{IndexedCache, KeyedCache, SingleValueCache};

/// Members of one registry generation, keyed by cache identity.
type Members = DashMap<usize, Arc<dyn Cache>>;

/// Aggregates caches so they can be invalidated together.
///
/// Caches join lazily: a tracked cache enlists itself the first time it is
/// populated, so the registry only ever holds caches that actually did work.
/// [`CacheRegistry::invalidate_all`] swaps the member set for an empty one
/// and invalidates each previous member once; caches re-enlist when they
/// are next populated.
///
/// ## Example
///
/// ```rust
/// use lazycache::{Cache, CacheRegistry};
///
/// let registry = CacheRegistry::new();
/// let answer = registry.create_single(|| 42);
/// let squares = registry.create_keyed(|n: &u64| n * n);
/// assert!(registry.is_empty());
///
/// answer.value();
/// squares.get(&12);
/// assert_eq!(registry.len(), 2);
///
/// registry.invalidate_all();
/// assert!(!answer.is_cached());
/// assert_eq!(squares.cached_len(), 0);
/// ```
#[derive(Clone)]
pub struct CacheRegistry {
    generation: Arc<RwLock<Arc<Members>>>,
}

/// Handle a tracked cache uses to enlist itself in its registry.
///
/// Holds the registry weakly: a cache never keeps its registry alive.
#[derive(Clone)]
pub struct Enlistment {
    generation: Weak<RwLock<Arc<Members>>>,
}

impl Enlistment {
    pub(crate) fn enlist(&self, identity: usize, cache: Arc<dyn Cache>) {
        let Some(generation) = self.generation.upgrade() else {
            return;
        };
        // Insert under the read lock so the member either lands in the
        // generation being swapped out (and is invalidated) or in the new one.
        let members = generation.read();
        if members.insert(identity, cache).is_none() {
            trace!(identity, "cache enlisted");
        }
    }
}

/// A cache that can be tracked by a [`CacheRegistry`].
pub trait Track: Cache {
    /// Attach the registry handle. A cache belongs to at most one registry;
    /// returns `false` if it was already attached. An already populated
    /// cache enlists right away.
    fn attach(&self, enlistment: Enlistment) -> bool;

    /// Identity shared by all clones of the cache.
    fn identity(&self) -> usize;
}

impl CacheRegistry {
    /// Create a new empty cache registry.
    pub fn new() -> Self {
        debug!("Cache registry initialized");
        Self {
            generation: Arc::new(RwLock::new(Arc::new(Members::new()))),
        }
    }

    fn enlistment(&self) -> Enlistment {
        Enlistment {
            generation: Arc::downgrade(&self.generation),
        }
    }

    fn members_now(&self) -> Arc<Members> {
        Arc::clone(&self.generation.read())
    }

    /// Track an existing cache.
    ///
    /// Returns `false` if the cache already belongs to a registry.
    pub fn track<C: Track>(&self, cache: &C) -> bool {
        cache.attach(self.enlistment())
    }

    /// Create a tracked single-value cache.
    pub fn create_single<T, F>(&self, populate: F) -> SingleValueCache<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let cache = SingleValueCache::new(populate);
        self.track(&cache);
        cache
    }

    /// Create a tracked indexed cache with locking enabled.
    pub fn create_indexed<T, F>(&self, len: usize, populate: F) -> IndexedCache<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        self.create_indexed_with(len, &CacheConfig::default(), populate)
    }

    pub fn create_indexed_with<T, F>(&self, len: usize, config: &CacheConfig, populate: F) -> IndexedCache<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        let cache = IndexedCache::with_config(len, config, populate);
        self.track(&cache);
        cache
    }

    /// Create a tracked keyed cache.
    pub fn create_keyed<K, V, F>(&self, populate: F) -> KeyedCache<K, V>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        let cache = KeyedCache::new(populate);
        self.track(&cache);
        cache
    }

    /// Create a tracked keyed cache sized by `config`.
    pub fn create_keyed_with<K, V, F>(&self, config: &CacheConfig, populate: F) -> Result<KeyedCache<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        let cache = KeyedCache::with_config(config, populate)?;
        self.track(&cache);
        Ok(cache)
    }

    /// Check whether `cache` is currently enlisted.
    pub fn contains<C: Track>(&self, cache: &C) -> bool {
        self.members_now().contains_key(&cache.identity())
    }

    /// Detach the current members and invalidate each of them once.
    ///
    /// Returns the number of caches invalidated.
    pub fn invalidate_all(&self) -> usize {
        let detached = std::mem::replace(&mut *self.generation.write(), Arc::new(Members::new()));

        let members: Vec<Arc<dyn Cache>> = detached.iter().map(|entry| Arc::clone(entry.value())).collect();
        detached.clear();

        for cache in &members {
            cache.invalidate();
        }

        debug!("Invalidated {} registered caches", members.len());
        members.len()
    }

    /// Snapshot of the enlisted caches.
    pub fn members(&self) -> Vec<Arc<dyn Cache>> {
        self.members_now()
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Get the number of enlisted caches.
    pub fn len(&self) -> usize {
        self.members_now().len()
    }

    /// Check if no cache is enlisted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for CacheRegistry {
    fn invalidate(&self) {
        self.invalidate_all();
    }

    fn cached_len(&self) -> usize {
        self.len()
    }
}

impl CacheOf<Arc<dyn Cache>> for CacheRegistry {
    fn cached_values(&self) -> Vec<Arc<dyn Cache>> {
        self.members()
    }
}

impl CacheStorage for CacheRegistry {
    const STORAGE: Storage = Storage::Shared;
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("cache_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::test_support::{init_tracing, Probe};

    #[test]
    fn test_unused_caches_are_not_enlisted() {
        init_tracing();
        let registry = CacheRegistry::new();
        let single = registry.create_single(|| 42);
        let keyed = registry.create_keyed(|k: &i32| k.to_string());
        let indexed = registry.create_indexed(4, |i| i);

        assert!(registry.is_empty());
        assert!(!registry.contains(&single));

        single.value();
        assert!(registry.contains(&single));
        assert!(!registry.contains(&keyed));
        assert!(!registry.contains(&indexed));
        assert_eq!(registry.len(), 1);

        keyed.get(&1);
        keyed.get(&2);
        indexed.get(0);
        indexed.get(1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.members().len(), 3);
    }

    #[test]
    fn test_invalidate_all() {
        let registry = CacheRegistry::new();
        let keyed = registry.create_keyed(|k: &i32| k.to_string());
        let single = registry.create_single(|| 42);

        keyed.get(&single.value());
        assert_eq!(registry.invalidate_all(), 2);

        assert!(registry.is_empty());
        assert!(keyed.is_empty());
        assert!(!single.is_cached());
    }

    #[test]
    fn test_caches_re_enlist_after_invalidation() {
        let registry = CacheRegistry::new();
        let keyed = registry.create_keyed(|k: &i32| *k);

        keyed.get(&1);
        registry.invalidate_all();
        assert!(!registry.contains(&keyed));

        keyed.get(&1);
        assert!(registry.contains(&keyed));
        assert_eq!(registry.invalidate_all(), 1);
        assert!(keyed.is_empty());
    }

    #[test]
    fn test_members_invalidated_once_per_generation() {
        let probe = Probe::new();
        let factory = probe.clone();
        let registry = CacheRegistry::new();
        let single = SingleValueCache::disposing(move || factory.resource());
        assert!(registry.track(&single));

        // Repopulating within one generation must not duplicate the member.
        single.value();
        single.invalidate();
        single.value();
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.invalidate_all(), 1);
        assert_eq!(probe.disposed(), 2);
        assert_eq!(probe.created(), 2);
    }

    #[test]
    fn test_track_populated_cache_enlists_immediately() {
        let registry = CacheRegistry::new();
        let cache = IndexedCache::new(3, |i| i * 2);
        cache.get(2);

        assert!(registry.track(&cache));
        assert!(registry.contains(&cache));

        let other = CacheRegistry::new();
        assert!(!other.track(&cache));
    }

    #[test]
    fn test_registry_is_a_cache() {
        let registry = CacheRegistry::new();
        let cache = registry.create_single(|| "inner");
        cache.value();

        let as_cache: Arc<dyn Cache> = Arc::new(registry.clone());
        assert_eq!(as_cache.cached_len(), 1);
        as_cache.invalidate();

        assert!(!cache.is_cached());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dropped_registry_is_ignored() {
        let cache = {
            let registry = CacheRegistry::new();
            registry.create_single(|| 1)
        };
        assert_eq!(cache.value(), 1);
    }

    #[test]
    fn test_concurrent_population_enlists_once() {
        let registry = CacheRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let keyed = registry.create_keyed(move |k: &usize| {
            counter.fetch_add(1, Ordering::SeqCst);
            *k
        });

        thread::scope(|s| {
            for t in 0..4 {
                let keyed = keyed.clone();
                s.spawn(move || {
                    for k in 0..32 {
                        assert_eq!(keyed.get(&((k + t) % 32)), (k + t) % 32);
                    }
                });
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 32);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.cached_values().len(), 1);
    }

    #[test]
    fn test_set_enlists_so_stored_values_are_invalidated() {
        let registry = CacheRegistry::new();
        let single = registry.create_single(|| 0);
        let indexed = registry.create_indexed(2, |i| i);
        let keyed = registry.create_keyed(|k: &u8| *k);

        single.set(7);
        indexed.set(1, 9);
        keyed.set(3, 30);
        assert_eq!(registry.len(), 3);

        registry.invalidate_all();
        assert!(!single.is_cached());
        assert_eq!(indexed.get_if_cached(1), None);
        assert_eq!(keyed.try_get_existing(&3), None);
    }

    #[test]
    fn test_invalidate_all_racing_first_population() {
        init_tracing();
        let registry = CacheRegistry::new();
        let keyed: Vec<KeyedCache<usize, usize>> = (0..4).map(|_| registry.create_keyed(|k: &usize| *k)).collect();
        let indexed: Vec<IndexedCache<usize>> = (0..4).map(|_| registry.create_indexed(1, |i| i)).collect();
        let singles: Vec<SingleValueCache<usize>> = (0..4).map(|i| registry.create_single(move || i)).collect();

        for round in 0..200 {
            thread::scope(|s| {
                for ((keyed, indexed), single) in keyed.iter().zip(&indexed).zip(&singles) {
                    s.spawn(move || {
                        keyed.get(&round);
                        indexed.get(0);
                        single.value();
                    });
                }
                s.spawn(|| registry.invalidate_all());
            });

            // Whatever survived the swap must be enlisted in the new generation.
            for cache in &keyed {
                assert!(cache.is_empty() || registry.contains(cache), "round {round}: keyed cache lost");
            }
            for cache in &indexed {
                assert!(cache.cached_len() == 0 || registry.contains(cache), "round {round}: indexed cache lost");
            }
            for cache in &singles {
                assert!(!cache.is_cached() || registry.contains(cache), "round {round}: single cache lost");
            }

            registry.invalidate_all();
            assert!(keyed.iter().all(|cache| cache.is_empty()));
            assert!(indexed.iter().all(|cache| cache.cached_len() == 0));
            assert!(singles.iter().all(|cache| !cache.is_cached()));
        }
    }
}
