//! Domain entities mirrored from persistent storage.

use std::cmp::Ordering;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{JobState, JobType};

/// A post as supplied by the post store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// A follow edge: `from_user_id` follows `to_user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FollowEdge {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub created_at: OffsetDateTime,
}

/// One row of a user's personal newsfeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NewsfeedEntryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_id: Uuid,
    pub created_at: OffsetDateTime,
}

impl NewsfeedEntryRecord {
    /// Build the entry delivering `post` to `user_id`. Entries carry the post's
    /// timestamp so feed order reflects posting time, not delivery time.
    pub fn for_recipient(user_id: Uuid, post: &PostRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            post_id: post.id,
            created_at: post.created_at,
        }
    }

    pub fn sort_key(&self) -> FeedSortKey {
        FeedSortKey::new(self.created_at, self.id)
    }
}

/// Total order over newsfeed entries: `created_at`, then `id` as tie-break.
///
/// Feeds are displayed in descending order of this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FeedSortKey {
    pub created_at: OffsetDateTime,
    pub id: Uuid,
}

impl FeedSortKey {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }
}

impl Ord for FeedSortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for FeedSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
    pub done_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn sort_key_breaks_timestamp_ties_by_id() {
        let at = datetime!(2024-01-01 00:00:00 UTC);
        let low = FeedSortKey::new(at, Uuid::from_u128(1));
        let high = FeedSortKey::new(at, Uuid::from_u128(2));
        let later = FeedSortKey::new(at + time::Duration::SECOND, Uuid::from_u128(0));

        assert!(low < high);
        assert!(high < later);
    }

    #[test]
    fn recipient_entry_uses_post_timestamp() {
        let post = PostRecord {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            content: "hello".to_string(),
            created_at: datetime!(2023-06-01 08:30:00 UTC),
        };
        let follower = Uuid::new_v4();

        let entry = NewsfeedEntryRecord::for_recipient(follower, &post);

        assert_eq!(entry.user_id, follower);
        assert_eq!(entry.post_id, post.id);
        assert_eq!(entry.created_at, post.created_at);
    }
}
