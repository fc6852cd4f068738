use std::sync::Arc;
use std::time::Instant;

use apalis::prelude::{Data, Error as ApalisError};
use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    application::repos::{NewsfeedRepo, RepoError},
    cache::{BoundedListCache, CachedFeedItem, ListKey},
    domain::entities::{NewsfeedEntryRecord, PostRecord},
};

use super::context::{JobWorkerContext, job_failed};

const METRIC_FANOUT_BATCH_MS: &str = "fanfeed_fanout_batch_ms";
const CACHE_PUSH_CONCURRENCY: usize = 16;

/// One slice of a post's audience, delivered as an independent unit.
///
/// Carries everything needed to build the entries so a worker never has to
/// look the post up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutBatchJobPayload {
    pub post_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub recipients: Vec<Uuid>,
    pub batch_index: u32,
    pub batch_count: u32,
}

impl FanoutBatchJobPayload {
    fn entries(&self) -> Vec<NewsfeedEntryRecord> {
        self.recipients
            .iter()
            .map(|user_id| NewsfeedEntryRecord {
                id: Uuid::new_v4(),
                user_id: *user_id,
                post_id: self.post_id,
                created_at: self.created_at,
            })
            .collect()
    }
}

/// Split `audience` into `ceil(len / batch_size)` batches for `post`.
pub fn partition_audience(
    post: &PostRecord,
    audience: &[Uuid],
    batch_size: usize,
) -> Vec<FanoutBatchJobPayload> {
    let batch_size = batch_size.max(1);
    let batch_count = audience.len().div_ceil(batch_size) as u32;
    audience
        .chunks(batch_size)
        .enumerate()
        .map(|(index, recipients)| FanoutBatchJobPayload {
            post_id: post.id,
            created_at: post.created_at,
            recipients: recipients.to_vec(),
            batch_index: index as u32,
            batch_count,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub already_present: usize,
}

/// Persists a batch and updates the recipients' cached lists.
pub struct BatchExecutor {
    newsfeeds: Arc<dyn NewsfeedRepo>,
    cache: Arc<BoundedListCache>,
}

impl BatchExecutor {
    pub fn new(newsfeeds: Arc<dyn NewsfeedRepo>, cache: Arc<BoundedListCache>) -> Self {
        Self { newsfeeds, cache }
    }

    /// Insert the batch's entries, then touch the cache of every recipient.
    ///
    /// Newly inserted entries are pushed. Recipients that already had the
    /// entry (a retried batch) get their list invalidated, since the earlier
    /// attempt may have died before its push.
    pub async fn execute(&self, batch: &FanoutBatchJobPayload) -> Result<BatchOutcome, RepoError> {
        let started_at = Instant::now();
        let outcome = self.newsfeeds.insert_entries(&batch.entries()).await?;

        let cache = self.cache.as_ref();
        stream::iter(outcome.inserted.iter())
            .for_each_concurrent(CACHE_PUSH_CONCURRENCY, |entry| async move {
                cache
                    .push(&ListKey::newsfeed(entry.user_id), &CachedFeedItem::from(entry))
                    .await;
            })
            .await;
        stream::iter(outcome.already_present.iter())
            .for_each_concurrent(CACHE_PUSH_CONCURRENCY, |user_id| async move {
                cache.invalidate(&ListKey::newsfeed(*user_id)).await;
            })
            .await;

        let result = BatchOutcome {
            inserted: outcome.inserted.len(),
            already_present: outcome.already_present.len(),
        };

        histogram!(METRIC_FANOUT_BATCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target = "application::fanout::batch",
            post_id = %batch.post_id,
            batch = batch.batch_index + 1,
            of = batch.batch_count,
            inserted = result.inserted,
            already_present = result.already_present,
            "fanout batch delivered"
        );

        Ok(result)
    }
}

pub async fn process_fanout_batch_job(
    payload: FanoutBatchJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    ctx.executor.execute(&payload).await.map_err(job_failed)?;
    Ok(())
}
