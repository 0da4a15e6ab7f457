//! Cache configuration.

use std::env;
use std::str::FromStr;

use serde::Deserialize;

use super::error::{CacheError, Result};

/// Synchronization mode for populating indexed caches.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locking {
    /// Double-checked locking: each slot is populated at most once per epoch.
    #[default]
    Enabled,
    /// No population lock. Concurrent misses on one slot may all run the
    /// populate callback, so the callback must be idempotent (or pure). The
    /// first value published is kept and returned to every racer. A disposing
    /// cache disposes the losing duplicates right away, since no caller ever
    /// saw them. `clear` must not race with readers in this mode.
    Disabled,
}

impl FromStr for Locking {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "enabled" | "on" | "true" => Ok(Self::Enabled),
            "disabled" | "off" | "false" => Ok(Self::Disabled),
            other => Err(CacheError::InvalidConfig {
                key: "LAZYCACHE_LOCKING",
                reason: format!("expected `enabled` or `disabled`, got `{other}`"),
            }),
        }
    }
}

/// Configuration for indexed and keyed caches.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Population locking for indexed caches.
    pub locking: Locking,

    /// Capacity a keyed cache reserves up front.
    pub initial_capacity: usize,

    /// Shard count for the map behind a keyed cache.
    /// `None` lets the map pick based on available parallelism.
    pub shard_amount: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            locking: Locking::Enabled,
            initial_capacity: 0,
            shard_amount: None,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with the given initial capacity.
    pub fn with_capacity(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            ..Default::default()
        }
    }

    /// Set the locking mode (builder pattern).
    #[must_use]
    pub fn locking(mut self, locking: Locking) -> Self {
        self.locking = locking;
        self
    }

    /// Set the shard count of keyed caches.
    #[must_use]
    pub fn shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = Some(shard_amount);
        self
    }

    /// Create config for caches hammered by many threads at once.
    /// Larger up-front capacity and more shards.
    pub fn high_contention() -> Self {
        Self {
            locking: Locking::Enabled,
            initial_capacity: 1_024,
            shard_amount: Some(64),
        }
    }

    /// Create config for caches only touched from one thread, or filled with
    /// idempotent callbacks where duplicated work is acceptable.
    pub fn single_threaded() -> Self {
        Self {
            locking: Locking::Disabled,
            initial_capacity: 0,
            shard_amount: Some(2),
        }
    }

    /// Check the values a keyed map would otherwise reject with a panic.
    pub fn validate(&self) -> Result<()> {
        if let Some(shards) = self.shard_amount
            && (shards < 2 || !shards.is_power_of_two())
        {
            return Err(CacheError::InvalidConfig {
                key: "shard_amount",
                reason: format!("must be a power of two greater than 1, got {shards}"),
            });
        }
        Ok(())
    }

    /// Load configuration from environment variables (and `.env` if present).
    ///
    /// - `LAZYCACHE_LOCKING`: `enabled` | `disabled`
    /// - `LAZYCACHE_INITIAL_CAPACITY`: entries reserved by keyed caches
    /// - `LAZYCACHE_SHARD_AMOUNT`: power of two greater than 1
    ///
    /// Unset variables keep their defaults; malformed ones are rejected.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(locking) = env::var("LAZYCACHE_LOCKING") {
            config.locking = locking.parse()?;
        }

        if let Ok(capacity) = env::var("LAZYCACHE_INITIAL_CAPACITY") {
            config.initial_capacity = parse_usize("LAZYCACHE_INITIAL_CAPACITY", &capacity)?;
        }

        if let Ok(shards) = env::var("LAZYCACHE_SHARD_AMOUNT") {
            config.shard_amount = Some(parse_usize("LAZYCACHE_SHARD_AMOUNT", &shards)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_usize(key: &'static str, raw: &str) -> Result<usize> {
    raw.trim().parse().map_err(|e| CacheError::InvalidConfig {
        key,
        reason: format!("`{raw}` is not a valid count: {e}"),
    })
}
