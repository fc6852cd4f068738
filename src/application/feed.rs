//! Newsfeed reads.
//!
//! Pages come from the user's cached list while they lie inside it and from
//! the newsfeed store once they reach past the cache horizon.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fanfeed_api_types::{FeedItemResponse, FeedPageResponse};
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::application::pagination::{CursorPage, FeedCursor, PageRequest, PaginationError};
use crate::application::repos::{NewsfeedRepo, RepoError};
use crate::cache::{BoundedListCache, CachedFeedItem, ListKey};
use crate::domain::entities::{FeedSortKey, NewsfeedEntryRecord};

const METRIC_FEED_STORE_FALLBACK: &str = "fanfeed_feed_store_fallback_total";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl FeedError {
    /// Whether the caller sent a request that can never succeed as-is.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FeedError::Pagination(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Maximum entries returned for an `after` query.
    pub after_cap: u32,
    pub store_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            after_cap: 200,
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&crate::config::FeedSettings> for FeedSettings {
    fn from(settings: &crate::config::FeedSettings) -> Self {
        Self {
            default_page_size: settings.default_page_size.get(),
            max_page_size: settings.max_page_size.get(),
            after_cap: settings.after_cap.get(),
            store_timeout: Duration::from_millis(settings.store_timeout_ms.get()),
        }
    }
}

impl FeedSettings {
    fn page_size(&self, requested: Option<u32>) -> usize {
        let max = self.max_page_size.max(1);
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, max) as usize
    }
}

/// A feed read request. At most one of `before` and `after` may be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedQuery {
    pub before: Option<FeedCursor>,
    pub after: Option<FeedCursor>,
    pub page_size: Option<u32>,
}

impl FeedQuery {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn before(cursor: FeedCursor) -> Self {
        Self {
            before: Some(cursor),
            ..Self::default()
        }
    }

    pub fn after(cursor: FeedCursor) -> Self {
        Self {
            after: Some(cursor),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Build a query from encoded cursors as received from a client.
    pub fn from_raw(
        before: Option<&str>,
        after: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            before: before.map(FeedCursor::decode).transpose()?,
            after: after.map(FeedCursor::decode).transpose()?,
            page_size,
        })
    }
}

/// One entry of a feed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedItem {
    pub id: Uuid,
    pub post_id: Uuid,
    pub created_at: OffsetDateTime,
}

impl FeedItem {
    pub fn sort_key(&self) -> FeedSortKey {
        FeedSortKey::new(self.created_at, self.id)
    }
}

impl From<&CachedFeedItem> for FeedItem {
    fn from(item: &CachedFeedItem) -> Self {
        Self {
            id: item.id,
            post_id: item.post_id,
            created_at: item.created_at,
        }
    }
}

impl From<&NewsfeedEntryRecord> for FeedItem {
    fn from(entry: &NewsfeedEntryRecord) -> Self {
        Self {
            id: entry.id,
            post_id: entry.post_id,
            created_at: entry.created_at,
        }
    }
}

pub type FeedPage = CursorPage<FeedItem>;

impl From<FeedPage> for FeedPageResponse {
    fn from(page: FeedPage) -> Self {
        FeedPageResponse {
            results: page
                .items
                .into_iter()
                .map(|item| FeedItemResponse {
                    id: item.id,
                    post_id: item.post_id,
                    created_at: item.created_at,
                })
                .collect(),
            has_next_page: page.has_next_page,
            next_cursor: page.next_cursor,
        }
    }
}

pub struct FeedService {
    newsfeeds: Arc<dyn NewsfeedRepo>,
    cache: Arc<BoundedListCache>,
    settings: FeedSettings,
}

impl FeedService {
    pub fn new(
        newsfeeds: Arc<dyn NewsfeedRepo>,
        cache: Arc<BoundedListCache>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            newsfeeds,
            cache,
            settings,
        }
    }

    /// One page of `user_id`'s newsfeed, newest first.
    #[instrument(skip(self, query), fields(user_id = %user_id))]
    pub async fn get_feed_page(
        &self,
        user_id: Uuid,
        query: FeedQuery,
    ) -> Result<FeedPage, FeedError> {
        let page_size = self.settings.page_size(query.page_size);
        match (query.before, query.after) {
            (Some(_), Some(_)) => Err(PaginationError::ConflictingCursors.into()),
            (None, Some(after)) => self.newer_than(user_id, after).await,
            (before, None) => self.older_than(user_id, before, page_size).await,
        }
    }

    /// Drop the cached newsfeed of `user_id`; the next read rebuilds it.
    pub async fn invalidate_cache(&self, user_id: Uuid) {
        self.cache.invalidate(&ListKey::newsfeed(user_id)).await;
    }

    async fn older_than(
        &self,
        user_id: Uuid,
        before: Option<FeedCursor>,
        page_size: usize,
    ) -> Result<FeedPage, FeedError> {
        if self.cache.is_enabled() {
            let list = self.load_list(user_id).await?;
            let start = match before {
                Some(cursor) => {
                    let bound = cursor.sort_key();
                    list.items.partition_point(|item| item.sort_key() >= bound)
                }
                None => 0,
            };
            let remaining = &list.items[start..];

            if remaining.len() > page_size {
                let items: Vec<FeedItem> =
                    remaining[..page_size].iter().map(FeedItem::from).collect();
                return Ok(finish_page(items, true));
            }
            if list.is_complete() {
                let items = remaining.iter().map(FeedItem::from).collect();
                return Ok(finish_page(items, false));
            }
            counter!(METRIC_FEED_STORE_FALLBACK, "reason" => "horizon").increment(1);
        } else {
            counter!(METRIC_FEED_STORE_FALLBACK, "reason" => "disabled").increment(1);
        }

        let limit = u32::try_from(page_size + 1).unwrap_or(u32::MAX);
        let mut entries = self
            .bounded(
                self.newsfeeds
                    .list_entries(user_id, PageRequest::new(limit, before)),
            )
            .await?;
        let has_next_page = entries.len() > page_size;
        entries.truncate(page_size);
        debug!(
            returned = entries.len(),
            has_next_page, "feed page served from store"
        );

        let items = entries.iter().map(FeedItem::from).collect();
        Ok(finish_page(items, has_next_page))
    }

    async fn newer_than(&self, user_id: Uuid, after: FeedCursor) -> Result<FeedPage, FeedError> {
        let bound = after.sort_key();
        let cap = self.settings.after_cap.max(1) as usize;

        if self.cache.is_enabled() {
            let list = self.load_list(user_id).await?;
            let covered = list.is_complete()
                || list
                    .items
                    .last()
                    .is_some_and(|oldest| oldest.sort_key() <= bound);
            if covered {
                let newer = list
                    .items
                    .iter()
                    .take_while(|item| item.sort_key() > bound)
                    .collect::<Vec<_>>();
                let skip = newer.len().saturating_sub(cap);
                let items = newer[skip..].iter().map(|item| FeedItem::from(*item)).collect();
                return Ok(finish_newer_page(items, skip > 0));
            }
            counter!(METRIC_FEED_STORE_FALLBACK, "reason" => "after").increment(1);
        } else {
            counter!(METRIC_FEED_STORE_FALLBACK, "reason" => "disabled").increment(1);
        }

        let limit = u32::try_from(cap + 1).unwrap_or(u32::MAX);
        let mut entries = self
            .bounded(self.newsfeeds.list_entries_after(user_id, after, limit))
            .await?;
        // Entries come back newest first; the extra one is the newest.
        let truncated = entries.len() > cap;
        if truncated {
            entries.remove(0);
        }
        let items = entries.iter().map(FeedItem::from).collect();
        Ok(finish_newer_page(items, truncated))
    }

    async fn load_list(&self, user_id: Uuid) -> Result<crate::cache::LoadedList, RepoError> {
        self.cache
            .load(&ListKey::newsfeed(user_id), |limit| {
                self.bounded(
                    self.newsfeeds
                        .list_entries(user_id, PageRequest::new(limit, None)),
                )
            })
            .await
    }

    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, RepoError>>,
    ) -> Result<T, RepoError> {
        tokio::time::timeout(self.settings.store_timeout, query)
            .await
            .map_err(|_| RepoError::Timeout)?
    }
}

fn finish_page(items: Vec<FeedItem>, has_next_page: bool) -> FeedPage {
    let next_cursor = has_next_page
        .then(|| items.last())
        .flatten()
        .map(|item| FeedCursor::from(item.sort_key()).encode());
    CursorPage::new(items, has_next_page, next_cursor)
}

/// An `after` page holds the oldest newer entries; when more remain, the
/// cursor points at the newest one returned so the caller can continue.
fn finish_newer_page(items: Vec<FeedItem>, truncated: bool) -> FeedPage {
    let next_cursor = truncated
        .then(|| items.first())
        .flatten()
        .map(|item| FeedCursor::from(item.sort_key()).encode());
    CursorPage::new(items, truncated, next_cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let settings = FeedSettings {
            default_page_size: 10,
            max_page_size: 50,
            ..Default::default()
        };
        assert_eq!(settings.page_size(None), 10);
        assert_eq!(settings.page_size(Some(0)), 1);
        assert_eq!(settings.page_size(Some(500)), 50);
        assert_eq!(settings.page_size(Some(7)), 7);
    }

    #[test]
    fn from_raw_rejects_malformed_cursor() {
        let err = FeedQuery::from_raw(Some("%%%"), None, None).unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(
            err,
            FeedError::Pagination(PaginationError::InvalidCursor(_))
        ));
    }

    #[test]
    fn next_cursor_only_when_more_pages() {
        let item = FeedItem {
            id: Uuid::new_v4(),
            post_id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
        };

        let page = finish_page(vec![item], true);
        let cursor = FeedCursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor.id(), item.id);

        assert!(finish_page(vec![item], false).next_cursor.is_none());
        assert!(finish_page(Vec::new(), true).next_cursor.is_none());
    }
}
