//! Bounded, ordered per-key list cache.
//!
//! Holds at most `horizon` newsfeed references per key, newest first. The
//! cache is never a correctness dependency: backend failures are logged,
//! counted and turned into direct store reads.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::application::repos::RepoError;
use crate::domain::entities::NewsfeedEntryRecord;

use super::codec::{CachedFeedItem, decode_list};
use super::config::CacheConfig;
use super::keys::ListKey;
use super::store::{CacheError, ListStore, MemoryListStore, Stamp};

const METRIC_CACHE_HIT: &str = "fanfeed_cache_hit_total";
const METRIC_CACHE_MISS: &str = "fanfeed_cache_miss_total";
const METRIC_CACHE_PUSH: &str = "fanfeed_cache_push_total";
const METRIC_CACHE_ERROR: &str = "fanfeed_cache_error_total";

/// Where a loaded list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    /// Served from the cache.
    Hit,
    /// Computed from the store after a miss.
    Loaded,
    /// Cache disabled or unavailable; computed from the store.
    Bypassed,
}

/// The most recent entries of one list, newest first.
#[derive(Debug, Clone)]
pub struct LoadedList {
    pub items: Vec<CachedFeedItem>,
    pub source: ListSource,
    horizon: usize,
}

impl LoadedList {
    /// True when the list holds every entry the store has for the key, i.e.
    /// nothing was cut off at the horizon.
    pub fn is_complete(&self) -> bool {
        self.items.len() < self.horizon
    }
}

enum Lookup {
    Hit(Vec<CachedFeedItem>),
    Miss(Stamp),
    Unavailable,
}

pub struct BoundedListCache {
    store: Option<Arc<dyn ListStore>>,
    horizon: usize,
    key_prefix: String,
}

impl BoundedListCache {
    /// Cache over `store`. A disabled configuration ignores the store.
    pub fn new(store: Arc<dyn ListStore>, config: &CacheConfig) -> Self {
        Self {
            store: config.enabled.then_some(store),
            horizon: config.horizon_non_zero().get(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// Cache backed by an in-process [`MemoryListStore`].
    pub fn in_memory(config: &CacheConfig) -> Self {
        let store = Arc::new(MemoryListStore::new(config.memory_max_keys_non_zero()));
        Self::new(store, config)
    }

    /// A cache that always reads through to the store.
    pub fn disabled(horizon: usize) -> Self {
        Self {
            store: None,
            horizon: horizon.max(1),
            key_prefix: String::new(),
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Return the cached list for `key`, computing it on a miss.
    ///
    /// `fallback` receives the number of entries to fetch and must return them
    /// ordered `(created_at, id)` descending. Its error is the only error this
    /// method returns.
    pub async fn load<F, Fut>(&self, key: &ListKey, fallback: F) -> Result<LoadedList, RepoError>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<Vec<NewsfeedEntryRecord>, RepoError>>,
    {
        let limit = u32::try_from(self.horizon).unwrap_or(u32::MAX);
        let Some(store) = &self.store else {
            let items = self.collect(fallback(limit).await?);
            return Ok(self.loaded(items, ListSource::Bypassed));
        };

        let rendered = key.render(&self.key_prefix);
        match self.lookup(store.as_ref(), &rendered).await {
            Lookup::Hit(items) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Ok(self.loaded(items, ListSource::Hit))
            }
            Lookup::Miss(stamp) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                let items = self.collect(fallback(limit).await?);
                let values = items.iter().map(CachedFeedItem::encode).collect();
                match store.fill(&rendered, values, stamp).await {
                    Ok(true) => debug!(key = %key, len = items.len(), "Cached list filled"),
                    Ok(false) => debug!(key = %key, "Cached list fill skipped: key written meanwhile"),
                    Err(err) => record_error("fill", key, &err),
                }
                Ok(self.loaded(items, ListSource::Loaded))
            }
            Lookup::Unavailable => {
                counter!(METRIC_CACHE_MISS).increment(1);
                let items = self.collect(fallback(limit).await?);
                Ok(self.loaded(items, ListSource::Bypassed))
            }
        }
    }

    /// Prepend `item` to the cached list and trim it to the horizon.
    ///
    /// A cold key stays cold: the next load computes it from the store, which
    /// already holds the entry.
    pub async fn push(&self, key: &ListKey, item: &CachedFeedItem) {
        let Some(store) = &self.store else {
            return;
        };

        let rendered = key.render(&self.key_prefix);
        match store
            .push_and_trim(&rendered, item.encode(), self.horizon)
            .await
        {
            Ok(existed) => {
                counter!(
                    METRIC_CACHE_PUSH,
                    "result" => if existed { "applied" } else { "cold" }
                )
                .increment(1);
            }
            Err(err) => {
                record_error("push", key, &err);
                // The list would now miss the entry; drop it if we still can.
                if let Err(err) = store.delete(&rendered).await {
                    record_error("delete", key, &err);
                }
            }
        }
    }

    /// Drop the cached list for `key`.
    pub async fn invalidate(&self, key: &ListKey) {
        let Some(store) = &self.store else {
            return;
        };

        match store.delete(&key.render(&self.key_prefix)).await {
            Ok(()) => debug!(key = %key, "Cached list invalidated"),
            Err(err) => record_error("delete", key, &err),
        }
    }

    async fn lookup(&self, store: &dyn ListStore, rendered: &str) -> Lookup {
        let stamp = match store.stamp(rendered).await {
            Ok(stamp) => stamp,
            Err(err) => {
                record_error_raw("stamp", rendered, &err);
                return Lookup::Unavailable;
            }
        };

        let raw = match store.range(rendered).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss(stamp),
            Err(err) => {
                record_error_raw("range", rendered, &err);
                return Lookup::Unavailable;
            }
        };

        match decode_list(&raw) {
            Ok(items) => Lookup::Hit(items),
            Err(err) => {
                record_error_raw("decode", rendered, &err);
                if let Err(err) = store.delete(rendered).await {
                    record_error_raw("delete", rendered, &err);
                    return Lookup::Unavailable;
                }
                match store.stamp(rendered).await {
                    Ok(stamp) => Lookup::Miss(stamp),
                    Err(err) => {
                        record_error_raw("stamp", rendered, &err);
                        Lookup::Unavailable
                    }
                }
            }
        }
    }

    fn collect(&self, entries: Vec<NewsfeedEntryRecord>) -> Vec<CachedFeedItem> {
        entries
            .iter()
            .take(self.horizon)
            .map(CachedFeedItem::from)
            .collect()
    }

    fn loaded(&self, items: Vec<CachedFeedItem>, source: ListSource) -> LoadedList {
        LoadedList {
            items,
            source,
            horizon: self.horizon,
        }
    }
}

fn record_error(op: &'static str, key: &ListKey, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR, "op" => op).increment(1);
    warn!(op, key = %key, error = %err, "Cache operation failed; using store");
}

fn record_error_raw(op: &'static str, key: &str, err: &CacheError) {
    counter!(METRIC_CACHE_ERROR, "op" => op).increment(1);
    warn!(op, key, error = %err, "Cache operation failed; using store");
}
