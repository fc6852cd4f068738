//! How fan-out batches reach an executor.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::{
    application::repos::{JobsRepo, RepoError},
    domain::types::JobType,
};

use super::batch::{BatchExecutor, FanoutBatchJobPayload};
use super::queue::enqueue_job;

const FANOUT_JOB_PRIORITY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    Queued,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Inline => f.write_str("inline"),
            DispatchMode::Queued => f.write_str("queued"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to enqueue fanout batch: {0}")]
    Enqueue(#[source] RepoError),
    #[error("inline fanout batch failed: {0}")]
    Execute(#[source] RepoError),
}

/// Hands a batch to whatever runs it.
#[async_trait]
pub trait BatchDispatcher: Send + Sync {
    /// Dispatch one batch. Returns the job id when the batch was queued.
    async fn dispatch(&self, batch: FanoutBatchJobPayload)
    -> Result<Option<String>, DispatchError>;

    fn mode(&self) -> DispatchMode;
}

/// Runs batches immediately in the calling task.
pub struct InlineDispatcher {
    executor: Arc<BatchExecutor>,
}

impl InlineDispatcher {
    pub fn new(executor: Arc<BatchExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl BatchDispatcher for InlineDispatcher {
    async fn dispatch(
        &self,
        batch: FanoutBatchJobPayload,
    ) -> Result<Option<String>, DispatchError> {
        self.executor
            .execute(&batch)
            .await
            .map_err(DispatchError::Execute)?;
        Ok(None)
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }
}

/// Enqueues batches as `fanout_batch` jobs for the worker pool.
pub struct QueuedDispatcher {
    jobs: Arc<dyn JobsRepo>,
    max_attempts: i32,
}

impl QueuedDispatcher {
    pub fn new(jobs: Arc<dyn JobsRepo>, max_attempts: i32) -> Self {
        Self {
            jobs,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl BatchDispatcher for QueuedDispatcher {
    async fn dispatch(
        &self,
        batch: FanoutBatchJobPayload,
    ) -> Result<Option<String>, DispatchError> {
        let job_id = enqueue_job(
            self.jobs.as_ref(),
            JobType::FanoutBatch,
            &batch,
            None,
            self.max_attempts,
            FANOUT_JOB_PRIORITY,
        )
        .await
        .map_err(DispatchError::Enqueue)?;

        debug!(
            target = "application::fanout::dispatch",
            post_id = %batch.post_id,
            batch = batch.batch_index + 1,
            job_id = %job_id,
            "fanout batch enqueued"
        );

        Ok(Some(job_id))
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Queued
    }
}
