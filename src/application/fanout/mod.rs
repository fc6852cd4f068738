//! Post fan-out: audience resolution, batching and delivery.

mod batch;
mod context;
mod dispatch;
mod queue;
mod service;

pub use batch::{
    BatchExecutor, BatchOutcome, FanoutBatchJobPayload, partition_audience,
    process_fanout_batch_job,
};
pub use context::{JobWorkerContext, job_failed};
pub use dispatch::{BatchDispatcher, DispatchError, DispatchMode, InlineDispatcher, QueuedDispatcher};
pub use queue::{enqueue_job, wait_for_job_completion};
pub use service::{FanoutError, FanoutReport, FanoutService, FanoutSettings};
