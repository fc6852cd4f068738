use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use fanfeed_api_types::FanoutResponse;
use metrics::counter;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    application::repos::{FriendshipsRepo, PostsRepo, RepoError},
    domain::entities::PostRecord,
};

use super::batch::{BatchExecutor, partition_audience};
use super::dispatch::{BatchDispatcher, DispatchError, DispatchMode, InlineDispatcher};

const METRIC_FANOUT_RECIPIENTS: &str = "fanfeed_fanout_recipients_total";
const METRIC_FANOUT_BATCHES: &str = "fanfeed_fanout_batches_total";

#[derive(Debug, Clone, Copy)]
pub struct FanoutSettings {
    /// Recipients per batch.
    pub batch_size: usize,
    /// Audiences of at most this many recipients are delivered inline.
    pub inline_threshold: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            inline_threshold: 0,
        }
    }
}

impl From<&crate::config::FanoutSettings> for FanoutSettings {
    fn from(settings: &crate::config::FanoutSettings) -> Self {
        Self {
            batch_size: settings.batch_size.get() as usize,
            inline_threshold: settings.inline_threshold as usize,
        }
    }
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("post `{0}` not found")]
    PostNotFound(Uuid),
    #[error("failed to load post: {0}")]
    Post(#[source] RepoError),
    #[error("failed to resolve audience: {0}")]
    Audience(#[source] RepoError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// What a fan-out call scheduled. Returned before queued batches run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub post_id: Uuid,
    pub recipients: usize,
    pub batches: usize,
    pub mode: DispatchMode,
    pub job_ids: Vec<String>,
}

impl fmt::Display for FanoutReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} newsfeeds are going to fanout, {} batches created.",
            self.recipients, self.batches
        )
    }
}

impl From<&FanoutReport> for FanoutResponse {
    fn from(report: &FanoutReport) -> Self {
        FanoutResponse {
            post_id: report.post_id,
            recipients: report.recipients,
            batches: report.batches,
        }
    }
}

pub struct FanoutService {
    posts: Arc<dyn PostsRepo>,
    friendships: Arc<dyn FriendshipsRepo>,
    inline: InlineDispatcher,
    dispatcher: Arc<dyn BatchDispatcher>,
    settings: FanoutSettings,
}

impl FanoutService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        friendships: Arc<dyn FriendshipsRepo>,
        executor: Arc<BatchExecutor>,
        dispatcher: Arc<dyn BatchDispatcher>,
        settings: FanoutSettings,
    ) -> Self {
        Self {
            posts,
            friendships,
            inline: InlineDispatcher::new(executor),
            dispatcher,
            settings,
        }
    }

    pub fn settings(&self) -> FanoutSettings {
        self.settings
    }

    /// Load `post_id` and fan it out.
    pub async fn fanout_post(&self, post_id: Uuid) -> Result<FanoutReport, FanoutError> {
        let post = self
            .posts
            .find_post(post_id)
            .await
            .map_err(FanoutError::Post)?
            .ok_or(FanoutError::PostNotFound(post_id))?;
        self.fanout(&post).await
    }

    /// Deliver `post` to its author and every current follower of the author.
    #[instrument(skip(self, post), fields(post_id = %post.id))]
    pub async fn fanout(&self, post: &PostRecord) -> Result<FanoutReport, FanoutError> {
        let audience = self.audience(post).await?;
        let dispatcher: &dyn BatchDispatcher = if audience.len() <= self.settings.inline_threshold
        {
            &self.inline
        } else {
            self.dispatcher.as_ref()
        };
        self.deliver(post, &audience, dispatcher).await
    }

    /// Like [`fanout`](Self::fanout) but runs every batch in the calling task.
    pub async fn fanout_inline(&self, post: &PostRecord) -> Result<FanoutReport, FanoutError> {
        let audience = self.audience(post).await?;
        self.deliver(post, &audience, &self.inline).await
    }

    async fn audience(&self, post: &PostRecord) -> Result<Vec<Uuid>, FanoutError> {
        let followers = self
            .friendships
            .followers(post.author_id)
            .await
            .map_err(FanoutError::Audience)?;

        let mut seen = HashSet::with_capacity(followers.len() + 1);
        let audience = std::iter::once(post.author_id)
            .chain(followers)
            .filter(|user_id| seen.insert(*user_id))
            .collect();
        Ok(audience)
    }

    async fn deliver(
        &self,
        post: &PostRecord,
        audience: &[Uuid],
        dispatcher: &dyn BatchDispatcher,
    ) -> Result<FanoutReport, FanoutError> {
        let batches = partition_audience(post, audience, self.settings.batch_size);
        let batch_count = batches.len();

        let mut job_ids = Vec::new();
        for batch in batches {
            if let Some(job_id) = dispatcher.dispatch(batch).await? {
                job_ids.push(job_id);
            }
        }

        counter!(METRIC_FANOUT_RECIPIENTS).increment(audience.len() as u64);
        counter!(METRIC_FANOUT_BATCHES, "mode" => dispatcher.mode().to_string())
            .increment(batch_count as u64);

        let report = FanoutReport {
            post_id: post.id,
            recipients: audience.len(),
            batches: batch_count,
            mode: dispatcher.mode(),
            job_ids,
        };

        info!(
            target = "application::fanout::service",
            post_id = %post.id,
            mode = %report.mode,
            "{report}"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reads_like_a_log_line() {
        let report = FanoutReport {
            post_id: Uuid::nil(),
            recipients: 4,
            batches: 2,
            mode: DispatchMode::Queued,
            job_ids: Vec::new(),
        };
        assert_eq!(
            report.to_string(),
            "4 newsfeeds are going to fanout, 2 batches created."
        );

        let response = FanoutResponse::from(&report);
        assert_eq!(response.recipients, 4);
        assert_eq!(response.batches, 2);
    }
}
