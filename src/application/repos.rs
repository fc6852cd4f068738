//! Repository traits describing persistence adapters and collaborators.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{FeedCursor, PageRequest, PaginationError};
use crate::domain::entities::{JobRecord, NewsfeedEntryRecord, PostRecord};
use crate::domain::types::JobType;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Outcome of a bulk newsfeed insert.
///
/// Rows rejected by the `(user_id, post_id)` uniqueness constraint are not an
/// error: they belong to a previous delivery of the same post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: Vec<NewsfeedEntryRecord>,
    pub already_present: Vec<Uuid>,
}

/// Authoritative append-only newsfeed store.
#[async_trait]
pub trait NewsfeedRepo: Send + Sync {
    /// Insert entries, skipping `(user_id, post_id)` pairs that already exist.
    async fn insert_entries(
        &self,
        entries: &[NewsfeedEntryRecord],
    ) -> Result<InsertOutcome, RepoError>;

    /// Entries for `user_id` strictly older than the cursor (or the newest
    /// entries without one), ordered `(created_at, id)` descending.
    async fn list_entries(
        &self,
        user_id: Uuid,
        page: PageRequest<FeedCursor>,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError>;

    /// Entries for `user_id` strictly newer than `after`, ordered
    /// `(created_at, id)` descending, at most `limit` of the oldest ones.
    async fn list_entries_after(
        &self,
        user_id: Uuid,
        after: FeedCursor,
        limit: u32,
    ) -> Result<Vec<NewsfeedEntryRecord>, RepoError>;
}

/// Friendship collaborator.
#[async_trait]
pub trait FriendshipsRepo: Send + Sync {
    /// Snapshot of the users following `user_id`.
    async fn followers(&self, user_id: Uuid) -> Result<Vec<Uuid>, RepoError>;
}

/// Post store collaborator.
#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn find_post(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub run_at: OffsetDateTime,
    pub max_attempts: i32,
    pub priority: i32,
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError>;

    async fn find_job(&self, id: &str) -> Result<Option<JobRecord>, RepoError>;
}
