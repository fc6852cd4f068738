//! Cursor pagination for newsfeeds.
//!
//! Page boundaries are the `(created_at, id)` of the last item a client saw,
//! never a numeric offset, so pages stay stable while new entries land at the
//! head of a feed.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::FeedSortKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FeedCursorPayload {
    created_at: OffsetDateTime,
    id: Uuid,
}

/// Position inside a newsfeed, ordered by `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

impl FeedCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    /// Cursor positioned after every entry sharing `created_at`; used as a
    /// `before` bound it selects entries strictly older than the timestamp.
    pub fn before_time(created_at: OffsetDateTime) -> Self {
        Self::new(created_at, Uuid::nil())
    }

    /// Cursor positioned ahead of every entry sharing `created_at`; used as an
    /// `after` bound it selects entries strictly newer than the timestamp.
    pub fn after_time(created_at: OffsetDateTime) -> Self {
        Self::new(created_at, Uuid::from_u128(u128::MAX))
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sort_key(&self) -> FeedSortKey {
        FeedSortKey::new(self.created_at, self.id)
    }

    pub fn encode(&self) -> String {
        let payload = FeedCursorPayload {
            created_at: self.created_at,
            id: self.id,
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing feed cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: FeedCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self::new(payload.created_at, payload.id))
    }
}

impl From<FeedSortKey> for FeedCursor {
    fn from(key: FeedSortKey) -> Self {
        Self::new(key.created_at, key.id)
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, has_next_page: bool, next_cursor: Option<String>) -> Self {
        Self {
            items,
            has_next_page,
            next_cursor,
        }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("`before` and `after` cursors are mutually exclusive")]
    ConflictingCursors,
}
