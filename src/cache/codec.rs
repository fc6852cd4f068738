//! Schema of the values stored in cached newsfeed lists.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{FeedSortKey, NewsfeedEntryRecord};

use super::store::CacheError;

const CURRENT_VERSION: u8 = 1;

/// Reference to one newsfeed entry as held by the cache.
///
/// Only identifiers and the ordering key are cached; the post itself is
/// materialized by whoever renders the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedFeedItem {
    pub id: Uuid,
    pub post_id: Uuid,
    pub created_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize)]
struct CachedFeedItemV1 {
    v: u8,
    id: Uuid,
    post_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl CachedFeedItem {
    pub fn sort_key(&self) -> FeedSortKey {
        FeedSortKey::new(self.created_at, self.id)
    }

    pub fn encode(&self) -> String {
        let wire = CachedFeedItemV1 {
            v: CURRENT_VERSION,
            id: self.id,
            post_id: self.post_id,
            created_at: self.created_at,
        };
        serde_json::to_string(&wire).expect("serializing cached feed item should succeed")
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        let wire: CachedFeedItemV1 =
            serde_json::from_str(raw).map_err(|err| CacheError::Codec(err.to_string()))?;
        if wire.v != CURRENT_VERSION {
            return Err(CacheError::Codec(format!(
                "unsupported cached item version {}",
                wire.v
            )));
        }
        Ok(Self {
            id: wire.id,
            post_id: wire.post_id,
            created_at: wire.created_at,
        })
    }
}

impl From<&NewsfeedEntryRecord> for CachedFeedItem {
    fn from(entry: &NewsfeedEntryRecord) -> Self {
        Self {
            id: entry.id,
            post_id: entry.post_id,
            created_at: entry.created_at,
        }
    }
}

/// Decode a cached list, requiring strictly descending `(created_at, id)`.
///
/// Out-of-order or duplicated entries (a late push landing above newer
/// items) are reported as corruption so the list gets rebuilt.
pub fn decode_list(raw: &[String]) -> Result<Vec<CachedFeedItem>, CacheError> {
    let items = raw
        .iter()
        .map(|value| CachedFeedItem::decode(value))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(pair) = items
        .windows(2)
        .find(|pair| pair[0].sort_key() <= pair[1].sort_key())
    {
        return Err(CacheError::Codec(format!(
            "cached list out of order at entry {}",
            pair[1].id
        )));
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn item(seconds: i64, id: u128) -> CachedFeedItem {
        CachedFeedItem {
            id: Uuid::from_u128(id),
            post_id: Uuid::from_u128(id + 1000),
            created_at: datetime!(2024-01-01 00:00:00 UTC) + time::Duration::seconds(seconds),
        }
    }

    #[test]
    fn encoded_item_is_tagged_with_version() {
        let encoded = item(0, 1).encode();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["v"], 1);
        assert_eq!(value["created_at"], "2024-01-01T00:00:00Z");
        assert_eq!(CachedFeedItem::decode(&encoded).unwrap(), item(0, 1));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let raw = r#"{"v":2,"id":"00000000-0000-0000-0000-000000000001","post_id":"00000000-0000-0000-0000-000000000002","created_at":"2024-01-01T00:00:00Z"}"#;
        assert!(matches!(
            CachedFeedItem::decode(raw),
            Err(CacheError::Codec(_))
        ));
        assert!(CachedFeedItem::decode("garbage").is_err());
    }

    #[test]
    fn decode_list_requires_descending_order() {
        let ordered = vec![item(2, 1).encode(), item(1, 2).encode()];
        assert_eq!(decode_list(&ordered).unwrap().len(), 2);

        let reversed = vec![item(1, 2).encode(), item(2, 1).encode()];
        assert!(decode_list(&reversed).is_err());

        let duplicated = vec![item(1, 2).encode(), item(1, 2).encode()];
        assert!(decode_list(&duplicated).is_err());
    }

    #[test]
    fn ties_on_timestamp_are_ordered_by_id() {
        let list = vec![item(5, 9).encode(), item(5, 3).encode()];
        assert!(decode_list(&list).is_ok());
    }
}
