//! Cache error types.

use thiserror::Error;

/// Errors reported by cache containers and their configuration.
///
/// Population failures are not represented here: a populate callback that
/// panics unwinds through the read that triggered it and leaves the cache
/// empty, so the next read retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Indexed access outside `[0, len)`.
    #[error("index {index} is out of range for an indexed cache of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A configuration value was rejected while building a cache.
    #[error("invalid cache configuration `{key}`: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;
