//! Cache key definitions.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// Identifies one cached list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListKey {
    /// A user's personal newsfeed.
    UserNewsfeed(Uuid),
}

impl ListKey {
    pub fn newsfeed(user_id: Uuid) -> Self {
        Self::UserNewsfeed(user_id)
    }

    /// Render the storage key under `prefix`, e.g. `newsfeeds:user:<id>`.
    pub fn render(&self, prefix: &str) -> String {
        match self {
            ListKey::UserNewsfeed(user_id) => format!("{prefix}:user:{user_id}"),
        }
    }
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKey::UserNewsfeed(user_id) => write!(f, "newsfeed({user_id})"),
        }
    }
}

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
