//! Key-value list storage behind the bounded list cache.
//!
//! Every key carries a write stamp next to its list. Pushes and deletes bump
//! the stamp; a fill only lands if the stamp still matches the value observed
//! before the fallback query ran, so a stale snapshot never replaces a newer
//! push.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

use super::keys::hash_value;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const SHARD_COUNT: usize = 16;

/// Write stamp for a key; `0` means the key has never been written (or, for
/// the memory store, that nothing has been evicted yet).
pub type Stamp = u64;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),
    #[error("cache value could not be decoded: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Atomic list operations the cache relies on.
///
/// Each method is a single atomic step for its key. Different keys are
/// independent.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Prepend `value` and trim the list to `max_len` if the list exists.
    /// Always bumps the stamp. Returns whether the list existed.
    async fn push_and_trim(
        &self,
        key: &str,
        value: String,
        max_len: usize,
    ) -> Result<bool, CacheError>;

    /// The whole list, head first, or `None` when the key is absent.
    async fn range(&self, key: &str) -> Result<Option<Vec<String>>, CacheError>;

    /// Current write stamp of `key`.
    async fn stamp(&self, key: &str) -> Result<Stamp, CacheError>;

    /// Replace the list with `values` if the stamp still equals `expected`.
    /// Returns whether the list was written.
    async fn fill(
        &self,
        key: &str,
        values: Vec<String>,
        expected: Stamp,
    ) -> Result<bool, CacheError>;

    /// Remove the list and bump the stamp.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

struct Slot {
    stamp: Stamp,
    items: Option<Vec<String>>,
}

/// In-process list store.
///
/// Keys are spread over a fixed number of LRU shards; each shard holds at most
/// `max_keys / SHARD_COUNT` lists (at least one).
///
/// An evicted slot takes its stamp with it, so absent keys report
/// `evicted_floor`, the highest stamp ever evicted. A fill observed before an
/// eviction therefore never matches after it.
pub struct MemoryListStore {
    shards: Vec<Mutex<LruCache<String, Slot>>>,
    next_stamp: AtomicU64,
    evicted_floor: AtomicU64,
}

impl MemoryListStore {
    pub fn new(max_keys: NonZeroUsize) -> Self {
        let per_shard = NonZeroUsize::new(max_keys.get().div_ceil(SHARD_COUNT))
            .unwrap_or(NonZeroUsize::MIN);
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self {
            shards,
            next_stamp: AtomicU64::new(1),
            evicted_floor: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<LruCache<String, Slot>> {
        let index = (hash_value(key) % SHARD_COUNT as u64) as usize;
        &self.shards[index]
    }

    fn bump(&self) -> Stamp {
        self.next_stamp.fetch_add(1, Ordering::SeqCst)
    }

    fn absent_stamp(&self) -> Stamp {
        self.evicted_floor.load(Ordering::SeqCst)
    }

    fn stamp_in(&self, shard: &LruCache<String, Slot>, key: &str) -> Stamp {
        shard
            .peek(key)
            .map(|slot| slot.stamp)
            .unwrap_or_else(|| self.absent_stamp())
    }

    /// Insert `slot`, raising the eviction floor if another key was pushed out.
    fn insert(&self, shard: &mut LruCache<String, Slot>, key: &str, slot: Slot) {
        if let Some((evicted_key, evicted)) = shard.push(key.to_string(), slot)
            && evicted_key != key
        {
            self.evicted_floor
                .fetch_max(evicted.stamp, Ordering::SeqCst);
        }
    }

    /// Number of keys currently holding a list.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                mutex_lock(shard, SOURCE, "len")
                    .iter()
                    .filter(|(_, slot)| slot.items.is_some())
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_and_trim(
        &self,
        key: &str,
        value: String,
        max_len: usize,
    ) -> Result<bool, CacheError> {
        let stamp = self.bump();
        let mut shard = mutex_lock(self.shard(key), SOURCE, "push_and_trim");
        match shard.get_mut(key) {
            Some(slot) => {
                slot.stamp = stamp;
                match slot.items.as_mut() {
                    Some(items) => {
                        items.insert(0, value);
                        items.truncate(max_len);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            None => {
                self.insert(&mut shard, key, Slot { stamp, items: None });
                Ok(false)
            }
        }
    }

    async fn range(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        let mut shard = mutex_lock(self.shard(key), SOURCE, "range");
        Ok(shard.get(key).and_then(|slot| slot.items.clone()))
    }

    async fn stamp(&self, key: &str) -> Result<Stamp, CacheError> {
        let shard = mutex_lock(self.shard(key), SOURCE, "stamp");
        Ok(self.stamp_in(&shard, key))
    }

    async fn fill(
        &self,
        key: &str,
        values: Vec<String>,
        expected: Stamp,
    ) -> Result<bool, CacheError> {
        let mut shard = mutex_lock(self.shard(key), SOURCE, "fill");
        let current = self.stamp_in(&shard, key);
        if current != expected {
            return Ok(false);
        }
        self.insert(
            &mut shard,
            key,
            Slot {
                stamp: current,
                items: Some(values),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let stamp = self.bump();
        let mut shard = mutex_lock(self.shard(key), SOURCE, "delete");
        match shard.get_mut(key) {
            Some(slot) => {
                slot.stamp = stamp;
                slot.items = None;
            }
            None => {
                self.insert(&mut shard, key, Slot { stamp, items: None });
            }
        }
        Ok(())
    }
}
