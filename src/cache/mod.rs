//! Newsfeed list cache.
//!
//! Keeps each user's most recent newsfeed entries in a bounded, ordered list
//! so the first pages of a feed never touch Postgres.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "memory"   # or "redis" with redis_url
//! horizon = 200
//! memory_max_keys = 10000
//! key_prefix = "newsfeeds"
//! ```

mod codec;
mod config;
mod consumer;
mod events;
mod keys;
mod list;
mod lock;
mod store;
mod trigger;

pub use codec::{CachedFeedItem, decode_list};
pub use config::{CacheBackend, CacheConfig};
pub use consumer::{ConsumeSummary, ConsumerSettings, EventConsumer};
pub use events::{Epoch, EventKind, EventQueue, FeedEvent};
pub use keys::{ListKey, hash_value};
pub use list::{BoundedListCache, ListSource, LoadedList};
pub use store::{CacheError, ListStore, MemoryListStore, Stamp};
pub use trigger::FeedTrigger;
