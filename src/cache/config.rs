//! Cache configuration.
//!
//! Controls the per-user newsfeed list cache via `fanfeed.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_HORIZON: usize = 200;
const DEFAULT_MEMORY_MAX_KEYS: usize = 10_000;
const DEFAULT_KEY_PREFIX: &str = "newsfeeds";

/// Which key-value store holds the cached lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

/// Cache configuration from `fanfeed.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the list cache. When disabled every read goes to the store.
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: Option<String>,
    /// Maximum entries kept per cached list (the horizon).
    pub horizon: usize,
    /// Maximum number of cached lists held by the in-memory backend.
    pub memory_max_keys: usize,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            redis_url: None,
            horizon: DEFAULT_HORIZON,
            memory_max_keys: DEFAULT_MEMORY_MAX_KEYS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            horizon: settings.horizon.get(),
            memory_max_keys: settings.memory_max_keys.get(),
            key_prefix: settings.key_prefix.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the horizon as NonZeroUsize, clamping to 1 if zero.
    pub fn horizon_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.horizon).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the memory key limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_max_keys_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_max_keys).unwrap_or(NonZeroUsize::MIN)
    }
}
