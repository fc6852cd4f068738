use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use super::batch::BatchExecutor;

/// Shared context passed to fan-out workers.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub executor: Arc<BatchExecutor>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
