//! Lazycache - Memoized, thread-safe, disposal-aware cache containers
//!
//! Expensive values are computed on first access and kept until explicitly
//! invalidated, either one cache at a time, through a [`CacheRegistry`], or
//! across a whole object graph with [`invalidate_graph`].
//!
//! ## Architecture
//!
//! - `cache` - Containers, registry, graph invalidation and configuration
//!
//! Logging goes through `tracing`; install a subscriber to see population,
//! enlistment and invalidation events.

pub mod cache;

#[cfg(test)]
mod test_support;

pub use cache::*;
