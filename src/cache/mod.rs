//! Cache module - Lazily populated, disposal-aware cache containers.
//!
//! Every container computes its values on first read through a populate
//! callback and keeps them until invalidated. Nothing is evicted by size or
//! age.
//!
//! ## Architecture
//!
//! - `Cache` / `CacheOf` - The capability every container implements
//! - `SingleValueCache` - One value behind shared state
//! - `SingleValueCacheByValue` / `ContextualValueCache` - One value stored inline
//! - `IndexedCache` - Fixed-length slots addressed by index
//! - `KeyedCache` - Unbounded concurrent map addressed by key
//! - `CacheRegistry` - Invalidates every cache that did work as one batch
//! - `graph` - Invalidates every cache reachable from a root value
//!
//! ## Usage
//!
//! ```rust
//! use lazycache::{CacheRegistry, IndexedCache};
//!
//! let registry = CacheRegistry::new();
//! let names: IndexedCache<String> = registry.create_indexed(11, |i| i.to_string());
//!
//! assert_eq!(names.get(10), "10");
//! registry.invalidate_all();
//! assert_eq!(names.get_if_cached(10), None);
//! ```

mod by_value;
mod config;
mod contextual;
mod error;
mod graph;
mod indexed;
mod keyed;
mod registry;
mod single;
mod slot;
mod traits;

pub use by_value::SingleValueCacheByValue;
pub use config::{CacheConfig, Locking};
pub use contextual::ContextualValueCache;
pub use error::{CacheError, Result};
pub use graph::{
    invalidate_graph, invalidate_graph_in_place, plan_for, CacheGraph, FieldInfo, FieldSet,
    InvalidationPlan,
};
pub use indexed::IndexedCache;
pub use keyed::KeyedCache;
pub use registry::{CacheRegistry, Enlistment, Track};
pub use single::SingleValueCache;
pub use traits::{Cache, CacheOf, CacheStorage, Dispose, Storage};
