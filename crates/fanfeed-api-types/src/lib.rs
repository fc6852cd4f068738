//! Shared response types for collaborators consuming the fanfeed core.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One newsfeed entry as presented to feed readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItemResponse {
    pub id: Uuid,
    pub post_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A page of newsfeed entries in display order (newest first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPageResponse {
    pub results: Vec<FeedItemResponse>,
    pub has_next_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl FeedPageResponse {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            has_next_page: false,
            next_cursor: None,
        }
    }
}

/// Summary returned when a fan-out has been scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutResponse {
    pub post_id: Uuid,
    pub recipients: usize,
    pub batches: usize,
}
